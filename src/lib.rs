//! # repl-tunnel
//!
//! Stateful remote script evaluator.
//!
//! Callers open a session, submit chunks of script source against it, and
//! get back the value of each chunk's trailing expression. Variables,
//! functions and classes defined by one chunk stay visible to the next.
//!
//! ## Features
//!
//! - **Embedded interpreter**: an indentation-structured Python subset
//! - **Persistent sessions**: one scope per session, evaluations serialized
//! - **HTTP + WebSocket API**: legacy protocol plus a REST family
//!
//! ## Quick Start
//!
//! ```no_run
//! use repl_tunnel::SessionStore;
//!
//! fn main() -> repl_tunnel::Result<()> {
//!     repl_tunnel::logging::try_init().ok();
//!
//!     let store = SessionStore::new();
//!     let id = store.create();
//!
//!     store.evaluate_on(&id, "def square(n):\n    return n * n\n")?;
//!     let result = store.evaluate_on(&id, "square(7)")?;
//!
//!     println!("{}", result.repr.unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod script;
pub mod session;

// Re-export commonly used types
pub use error::{ReplTunnelError, Result};
pub use script::{Engine, EngineConfig, EvalError, Evaluation, ParseError, Scope, Value};
pub use session::{Session, SessionId, SessionStore, VariableInfo};
