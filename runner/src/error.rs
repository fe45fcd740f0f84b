//! Typed failures that drive control flow in the execution core.
//!
//! Everything travels as [`anyhow::Error`]; these types are recovered with
//! `downcast_ref` where the retry logic needs to know what went wrong.

use thiserror::Error;

use crate::core::classifier::{ErrorDescription, ErrorOrigin};

/// Failure reported by a model provider (or a process standing in for one).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub origin: ErrorOrigin,
    pub message: String,
    pub status_code: Option<u16>,
    pub http_status: Option<u16>,
}

impl ProviderError {
    pub fn new(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            status_code: None,
            http_status: None,
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorOrigin::Api, message)
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ErrorOrigin::InvalidValue, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorOrigin::ResourceExhausted, message)
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

/// A tool invoked by the agent failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolExecutionError {
    pub tool: Option<String>,
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(tool: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Cooperative cancellation raised at a checkpoint after SIGINT.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("agent interrupted")]
pub struct Interrupted;

/// Transient failures outlasted the retry budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("max retries ({max_retries}) exceeded; last error: {last_error}")]
pub struct MaxRetriesExceeded {
    pub max_retries: u32,
    pub last_error: String,
}

/// Normalise any error into the provider-independent description used by
/// [`crate::core::classifier::classify`].
///
/// The first typed [`ProviderError`] or [`ToolExecutionError`] found in the
/// cause chain wins; anything else is [`ErrorOrigin::Other`].
pub fn describe(err: &anyhow::Error) -> ErrorDescription {
    for cause in err.chain() {
        if let Some(provider) = cause.downcast_ref::<ProviderError>() {
            return ErrorDescription {
                origin: provider.origin,
                message: provider.message.clone(),
                status_code: provider.status_code,
                http_status: provider.http_status,
            };
        }
        if let Some(tool) = cause.downcast_ref::<ToolExecutionError>() {
            return ErrorDescription::new(ErrorOrigin::ToolExecution, tool.message.clone());
        }
    }
    ErrorDescription::new(ErrorOrigin::Other, format!("{err:#}"))
}

/// Whether the cause chain contains a cooperative cancellation.
pub fn is_interrupt(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Interrupted>())
}
