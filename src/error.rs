//! Error types for the glassbox evaluator.
//!
//! Only host-side failures live here. An exception thrown by evaluated code
//! is never an error from the caller's perspective: its message is appended
//! to the captured output and the run completes normally.

use thiserror::Error;

/// Top-level error type for evaluation operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The code text exceeds the configured size limit.
    #[error("code text is {actual} bytes, exceeding the limit of {max}")]
    CodeTooLarge { max: usize, actual: usize },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error while reading code or configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal host failure (engine setup, blocking-task join).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for evaluation operations.
pub type Result<T> = std::result::Result<T, Error>;
