//! HTTP API handlers.
//!
//! Two families share one store: the legacy protocol (`/ping`,
//! `/newSession`, `/evalChunk`, `/deleteSession`) and the REST API under
//! `/api/v1`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::warn;

use super::types::{
    CreateSessionResponse, ErrorResponse, EvalRequest, EvalResponse, LegacyErrorResponse,
    LegacyEvalRequest, LegacyEvalResponse, LegacySessionRequest, LegacySessionResponse,
    ListSessionsResponse, PingResponse, SessionStatusResponse, SessionSummary,
};
use crate::error::ReplTunnelError;
use crate::script::{Engine, Evaluation};
use crate::session::{SessionId, SessionStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_store(Arc::new(SessionStore::new()))
    }

    /// State backed by a store whose engine uses the given limits.
    pub fn with_engine(engine: Engine) -> Self {
        Self::with_store(Arc::new(SessionStore::with_engine(engine)))
    }

    pub fn with_store(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type LegacyError = (StatusCode, Json<LegacyErrorResponse>);

/// HTTP status for a store or engine failure.
pub fn status_for(err: &ReplTunnelError) -> StatusCode {
    match err {
        ReplTunnelError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ReplTunnelError::Parse(_) => StatusCode::BAD_REQUEST,
        ReplTunnelError::Evaluation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: ReplTunnelError) -> ApiError {
    (status_for(&err), Json(ErrorResponse::from_error(&err)))
}

fn legacy_error(err: ReplTunnelError) -> LegacyError {
    (status_for(&err), Json(LegacyErrorResponse::from_error(&err)))
}

fn parse_session_id(raw: &str) -> Result<SessionId, ReplTunnelError> {
    raw.parse()
}

/// Evaluate a chunk on a blocking worker so the runtime keeps serving
/// other requests while it runs.
///
/// Returns the evaluation together with its wall-clock duration in
/// milliseconds.
pub async fn evaluate_chunk(
    store: Arc<SessionStore>,
    id: SessionId,
    src: String,
) -> crate::Result<(Evaluation, u64)> {
    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        store
            .evaluate_on(&id, &src)
            .map(|evaluation| (evaluation, started.elapsed().as_millis() as u64))
    })
    .await
    .map_err(|e| {
        warn!(session = %id, error = %e, "evaluation task failed");
        ReplTunnelError::Internal(e.to_string())
    })?
}

// ---------------------------------------------------------------------------
// Legacy protocol
// ---------------------------------------------------------------------------

/// Liveness probe of the legacy protocol.
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse::pong())
}

/// Create a session.
pub async fn new_session(State(state): State<AppState>) -> Json<LegacySessionResponse> {
    Json(LegacySessionResponse::new(state.store.create()))
}

/// Evaluate a chunk on a session.
pub async fn eval_chunk(
    State(state): State<AppState>,
    Json(req): Json<LegacyEvalRequest>,
) -> Result<Json<LegacyEvalResponse>, LegacyError> {
    let id = parse_session_id(&req.sid).map_err(legacy_error)?;
    let (evaluation, _) = evaluate_chunk(Arc::clone(&state.store), id, req.src)
        .await
        .map_err(legacy_error)?;

    Ok(Json(LegacyEvalResponse::from_evaluation(&evaluation)))
}

/// Delete a session.
pub async fn delete_session_legacy(
    State(state): State<AppState>,
    Json(req): Json<LegacySessionRequest>,
) -> Result<Json<LegacySessionResponse>, LegacyError> {
    let id = parse_session_id(&req.sid).map_err(legacy_error)?;
    state.store.delete(&id).map_err(legacy_error)?;

    Ok(Json(LegacySessionResponse::new(id)))
}

// ---------------------------------------------------------------------------
// REST API
// ---------------------------------------------------------------------------

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "repl-tunnel",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "sessions": state.store.count(),
    }))
}

/// List all sessions, oldest first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions: Vec<SessionSummary> = state
        .store
        .list()
        .iter()
        .map(|session| SessionSummary::from_session(session))
        .collect();

    Json(ListSessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

/// Create a new session.
pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let session_id = state.store.create();
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse::new(session_id)),
    )
}

/// Get session status and its variables.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let id = parse_session_id(&session_id).map_err(api_error)?;

    let session = state
        .store
        .get(&id)
        .ok_or_else(|| api_error(ReplTunnelError::SessionNotFound(session_id)))?;

    SessionStatusResponse::from_session(&session)
        .map(Json)
        .map_err(api_error)
}

/// Delete a session.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_session_id(&session_id).map_err(api_error)?;
    state.store.delete(&id).map_err(api_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Evaluate a chunk in a session.
pub async fn eval_in_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<EvalRequest>,
) -> Result<Json<EvalResponse>, ApiError> {
    let id = parse_session_id(&session_id).map_err(api_error)?;
    let (evaluation, duration_ms) = evaluate_chunk(Arc::clone(&state.store), id, req.src)
        .await
        .map_err(api_error)?;

    Ok(Json(EvalResponse::from_evaluation(&evaluation, duration_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{EvalError, ParseError};

    #[test]
    fn test_app_state_new() {
        let state = AppState::new();
        assert_eq!(state.store.count(), 0);
    }

    #[test]
    fn test_status_for() {
        assert_eq!(
            status_for(&ReplTunnelError::SessionNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ParseError::new(1, 1, "invalid syntax").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&EvalError::new("ValueError", "bad").into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ReplTunnelError::LockPoisoned),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = health().await;
        assert_eq!(response, "OK");
    }

    #[test]
    fn test_ping_endpoint() {
        let response = tokio_test::block_on(ping());
        assert_eq!(response.0.result, "ok");
        assert_eq!(response.0.reply, "pong");
    }

    #[tokio::test]
    async fn test_api_info_endpoint() {
        let response = api_info(State(AppState::new())).await;
        let json = response.0;
        assert_eq!(json["name"], "repl-tunnel");
        assert_eq!(json["status"], "running");
        assert_eq!(json["sessions"], 0);
    }

    #[tokio::test]
    async fn test_evaluate_chunk_runs_on_store() {
        let store = Arc::new(SessionStore::new());
        let id = store.create();

        let (evaluation, _) = evaluate_chunk(Arc::clone(&store), id, "a = 10\na".into())
            .await
            .unwrap();
        assert_eq!(evaluation.repr.as_deref(), Some("10"));

        let err = evaluate_chunk(store, SessionId::from_raw(1), "1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplTunnelError::SessionNotFound(_)));
    }
}
