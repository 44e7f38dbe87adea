//! Script evaluation engine.
//!
//! Chunks of source in a small Python-like language are parsed, split into
//! setup statements plus an optional trailing expression, and run against a
//! session's persistent [`Scope`].

pub mod ast;
mod builtins;
mod engine;
mod error;
mod exceptions;
mod format;
mod interpreter;
mod long_int;
pub mod parse;
mod scope;
mod value;

pub use engine::{
    split_trailing, Engine, EngineConfig, Evaluation, DEFAULT_MAX_CALL_DEPTH, DEFAULT_STACK_SIZE,
    MAX_STACK_SIZE, STACK_PER_CALL,
};
pub use error::{EvalError, ParseError, ScriptError};
pub use exceptions::ExcKind;
pub use interpreter::Interpreter;
pub use parse::{parse_expression, parse_module};
pub use scope::Scope;
pub use value::{Builtin, Class, HashKey, Instance, Range, Value};
