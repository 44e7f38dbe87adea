//! Error types for repl-tunnel.

use thiserror::Error;

use crate::script::{EvalError, ParseError, ScriptError};

/// Main error type for repl-tunnel operations.
#[derive(Error, Debug)]
pub enum ReplTunnelError {
    /// Session with the given ID was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Submitted source could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Submitted source raised while running.
    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ScriptError> for ReplTunnelError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::Parse(e) => ReplTunnelError::Parse(e),
            ScriptError::Evaluation(e) => ReplTunnelError::Evaluation(e),
        }
    }
}

/// Convenience Result type for repl-tunnel operations.
pub type Result<T> = std::result::Result<T, ReplTunnelError>;
