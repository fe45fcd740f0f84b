//! Deterministic classification of agent-run failures.
//!
//! Failures from different providers are first normalised into an
//! [`ErrorDescription`] and then matched against a fixed, ordered rule set.
//! Nothing here sleeps or retries; see [`crate::retry`] for the policy.

use std::sync::LazyLock;

use regex::Regex;

/// Broad origin of a failure, as reported by the code that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// A tool invoked by the agent failed.
    ToolExecution,
    /// The model provider's API rejected or failed the request.
    Api,
    /// A value/usage error: bad input or configuration on our side.
    InvalidValue,
    /// The provider reported exhausted capacity or quota.
    ResourceExhausted,
    /// Anything not raised through a typed provider or tool error.
    Other,
}

/// Provider-independent view of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescription {
    pub origin: ErrorOrigin,
    pub message: String,
    pub status_code: Option<u16>,
    pub http_status: Option<u16>,
}

impl ErrorDescription {
    pub fn new(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            status_code: None,
            http_status: None,
        }
    }

    fn has_status(&self, status: u16) -> bool {
        self.status_code == Some(status) || self.http_status == Some(status)
    }
}

/// Outcome of classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying cannot help; the run must be marked crashed with `reason`.
    Unretryable { reason: String },
    /// Expected to clear with time; retry with backoff.
    Transient,
    /// Not a runtime fault; hand the error back to the caller unchanged.
    Propagate,
}

static BAD_REQUEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b400\b|bad request").expect("bad request pattern is valid"));

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)429|rate limit|too many requests|quota exceeded")
        .expect("rate limit pattern is valid")
});

/// Classify a failure. Rules are evaluated in order; the first match wins.
///
/// 1. Tool or API failures that look like a client-side bad request are
///    [`ErrorClass::Unretryable`].
/// 2. Rate limiting and exhausted capacity are [`ErrorClass::Transient`].
/// 3. Value errors not matching (2) propagate, unless they wrap a provider
///    error code.
/// 4. Anything else is transient, unless it looks like a bad request, in
///    which case it propagates.
pub fn classify(error: &ErrorDescription) -> ErrorClass {
    if let Some(reason) = unretryable_reason(error) {
        return ErrorClass::Unretryable { reason };
    }
    if is_rate_limited(error) {
        return ErrorClass::Transient;
    }
    match error.origin {
        ErrorOrigin::InvalidValue => {
            if error.message.to_lowercase().contains("code") {
                ErrorClass::Transient
            } else {
                ErrorClass::Propagate
            }
        }
        _ if looks_like_bad_request(error) => ErrorClass::Propagate,
        _ => ErrorClass::Transient,
    }
}

fn unretryable_reason(error: &ErrorDescription) -> Option<String> {
    let label = match error.origin {
        ErrorOrigin::ToolExecution => "Unretryable error",
        ErrorOrigin::Api => "Unretryable API error",
        _ => return None,
    };
    looks_like_bad_request(error).then(|| format!("{label}: {}", error.message))
}

fn looks_like_bad_request(error: &ErrorDescription) -> bool {
    error.has_status(400) || BAD_REQUEST_RE.is_match(&error.message)
}

/// Rate limiting or capacity exhaustion, by status, origin or message text.
pub fn is_rate_limited(error: &ErrorDescription) -> bool {
    if error.has_status(429) || error.origin == ErrorOrigin::ResourceExhausted {
        return true;
    }
    if RATE_LIMIT_RE.is_match(&error.message) {
        return true;
    }
    let lower = error.message.to_lowercase();
    lower.contains("rate") && lower.contains("limit")
}
