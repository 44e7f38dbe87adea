//! Error types reported by the evaluation engine.

use std::fmt;

use thiserror::Error;

/// Malformed source. The scope is never touched when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// A fault raised while running a chunk.
///
/// The scope keeps whatever mutations happened before the fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    /// Exception type name, e.g. `ZeroDivisionError`.
    pub kind: String,
    /// Exception message as `str(exc)` would render it.
    pub message: String,
    /// Line of the innermost statement that raised, if known.
    pub line: Option<u32>,
    /// Text printed before the fault.
    pub output: String,
}

impl EvalError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            line: None,
            output: String::new(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Either failure mode of [`Engine::evaluate`](super::Engine::evaluate).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvalError),
}
