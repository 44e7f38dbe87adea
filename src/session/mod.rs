//! Session management module.
//!
//! This module provides session identification and the store that owns
//! every live session's scope.

mod id;
mod store;

pub use id::SessionId;
pub use store::{Session, SessionStore, VariableInfo};
