//! Chunk evaluation.
//!
//! A chunk is parsed into top-level statements. When the last one is a bare
//! expression it becomes the *trailing expression*: everything before it runs
//! for effect, then the trailing expression is evaluated against the updated
//! scope and its value is returned.

use std::any::Any;
use std::thread;

use tracing::{debug, warn};

use super::ast::{Stmt, StmtKind};
use super::error::{EvalError, ScriptError};
use super::interpreter::Interpreter;
use super::parse::parse_module;
use super::scope::Scope;
use super::value::Value;

/// Default cap on nested function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Default stack size of the evaluation thread.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Evaluation stack reserved for each level of script call nesting.
pub const STACK_PER_CALL: usize = 256 * 1024;

/// Largest evaluation thread stack the engine will request.
pub const MAX_STACK_SIZE: usize = 1024 * 1024 * 1024;

/// Limits applied to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Nested calls allowed before `RecursionError` is raised.
    pub max_call_depth: usize,
    /// Stack size in bytes of the thread that runs a chunk.
    pub stack_size: usize,
}

impl EngineConfig {
    /// Limits for `max_call_depth` with a stack large enough to reach it.
    pub fn for_call_depth(max_call_depth: usize) -> Self {
        Self {
            max_call_depth,
            stack_size: DEFAULT_STACK_SIZE.max(Self::required_stack_size(max_call_depth)),
        }
    }

    /// Stack needed to run `max_call_depth` nested calls.
    pub fn required_stack_size(max_call_depth: usize) -> usize {
        max_call_depth.saturating_mul(STACK_PER_CALL)
    }

    /// Check that the stack can hold the call depth and stays within
    /// [`MAX_STACK_SIZE`].
    pub fn validate(&self) -> Result<(), String> {
        let required = Self::required_stack_size(self.max_call_depth);
        if required > MAX_STACK_SIZE {
            return Err(format!(
                "max_call_depth {} needs {} KiB of stack, above the {} KiB limit",
                self.max_call_depth,
                required / 1024,
                MAX_STACK_SIZE / 1024
            ));
        }
        if self.stack_size > MAX_STACK_SIZE {
            return Err(format!(
                "stack of {} KiB is above the {} KiB limit",
                self.stack_size / 1024,
                MAX_STACK_SIZE / 1024
            ));
        }
        if self.stack_size < required {
            return Err(format!(
                "stack of {} KiB cannot hold {} nested calls; at least {} KiB is needed",
                self.stack_size / 1024,
                self.max_call_depth,
                required / 1024
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_call_depth(DEFAULT_MAX_CALL_DEPTH)
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Value of the trailing expression, absent when the chunk has none.
    pub value: Option<Value>,
    /// `repr()` of `value`.
    pub repr: Option<String>,
    /// Text written by `print` while the chunk ran.
    pub output: String,
}

impl Evaluation {
    /// Type name of the trailing value.
    pub fn type_name(&self) -> Option<String> {
        self.value.as_ref().map(Value::type_name)
    }
}

/// Split top-level statements into setup statements and the trailing
/// expression statement, if the last statement is a bare expression.
pub fn split_trailing(stmts: &[Stmt]) -> (&[Stmt], Option<&Stmt>) {
    match stmts.split_last() {
        Some((last, setup)) if matches!(last.kind, StmtKind::Expr(_)) => (setup, Some(last)),
        _ => (stmts, None),
    }
}

/// Runs chunks against session scopes.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate `source` against `scope`, mutating it in place.
    ///
    /// A parse failure leaves `scope` untouched. A runtime fault keeps the
    /// mutations made before it.
    pub fn evaluate(&self, source: &str, scope: &mut Scope) -> Result<Evaluation, ScriptError> {
        thread::scope(|s| -> Result<Evaluation, ScriptError> {
            let handle = thread::Builder::new()
                .name("repl-eval".to_string())
                .stack_size(self.config.stack_size)
                .spawn_scoped(s, move || self.run(source, scope))
                .map_err(|e| {
                    EvalError::new(
                        "SystemError",
                        format!("failed to start evaluation thread: {}", e),
                    )
                })?;

            handle.join().unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                warn!(%message, "evaluation thread panicked");
                Err(EvalError::new("SystemError", message).into())
            })
        })
    }

    fn run(&self, source: &str, scope: &mut Scope) -> Result<Evaluation, ScriptError> {
        let stmts = parse_module(source)?;
        let (setup, trailing) = split_trailing(&stmts);
        debug!(
            statements = setup.len(),
            trailing = trailing.is_some(),
            "evaluating chunk"
        );

        let mut interp = Interpreter::new(scope, self.config.max_call_depth);
        let outcome = interp
            .run(setup)
            .and_then(|()| trailing.map(|stmt| interp.eval_statement_value(stmt)).transpose());

        match outcome {
            Ok(value) => {
                let repr = match &value {
                    Some(v) => Some(interp.repr(v).unwrap_or_else(|_| v.plain_repr())),
                    None => None,
                };
                Ok(Evaluation {
                    value,
                    repr,
                    output: interp.take_output(),
                })
            }
            Err(raised) => Err(interp.describe_error(raised).into()),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("interpreter panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("interpreter panicked: {}", s)
    } else {
        "interpreter panicked".to_string()
    }
}
