//! API layer for repl-tunnel.
//!
//! This module exposes the session store over HTTP and WebSocket.
//!
//! ## Endpoints
//!
//! ### Legacy protocol
//! - `GET /ping` - Liveness probe
//! - `POST /newSession` - Create a session
//! - `POST /evalChunk` - Evaluate `{"sid", "src"}`
//! - `POST /deleteSession` - Delete `{"sid"}`
//!
//! ### Health & Info
//! - `GET /health` - Health check
//! - `GET /api/v1/` - API information
//!
//! ### Sessions
//! - `GET /api/v1/sessions` - List all sessions
//! - `POST /api/v1/sessions` - Create a new session
//! - `GET /api/v1/sessions/{id}` - Session status and variables
//! - `DELETE /api/v1/sessions/{id}` - Delete a session
//! - `POST /api/v1/sessions/{id}/eval` - Evaluate a chunk in a session
//! - `WS /api/v1/sessions/{id}/ws` - WebSocket for interactive evaluation
//!
//! ## Example
//!
//! ```no_run
//! use repl_tunnel::api::{ServerConfig, serve};
//!
//! #[tokio::main]
//! async fn main() -> repl_tunnel::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 8080);
//!     serve(config).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

// Re-export commonly used types
pub use handlers::AppState;
pub use router::{create_router, create_router_with_state, serve, serve_with_state, ServerConfig};
pub use types::{
    value_to_json, CreateSessionResponse, ErrorResponse, EvalRequest, EvalResponse,
    LegacyErrorResponse, LegacyEvalResponse, ListSessionsResponse, SessionStatusResponse,
    WsMessage,
};
