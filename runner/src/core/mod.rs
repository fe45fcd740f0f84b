//! Deterministic, pure logic shared by the execution core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod backoff;
pub mod classifier;
pub mod models;
pub mod tokens;
pub mod trim;
pub mod types;
