//! API request and response types.

use std::collections::HashSet;

use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::ReplTunnelError;
use crate::script::{Evaluation, Value};
use crate::session::{Session, SessionId, VariableInfo};

/// Containers nested deeper than this are rendered through `repr`.
const MAX_JSON_DEPTH: usize = 64;

/// Render a script value as JSON when it has a natural JSON form.
///
/// `None`, booleans, integers, finite floats, strings, lists, tuples and
/// dicts with string keys map directly. Anything else, at any nesting level,
/// yields `None` so the caller can fall back to the `repr` string.
pub fn value_to_json(value: &Value) -> Option<serde_json::Value> {
    to_json(value, &mut HashSet::new(), 0)
}

fn to_json(value: &Value, seen: &mut HashSet<usize>, depth: usize) -> Option<serde_json::Value> {
    use serde_json::Value as Json;

    if depth > MAX_JSON_DEPTH {
        return None;
    }

    match value {
        Value::None => Some(Json::Null),
        Value::Bool(b) => Some(Json::Bool(*b)),
        Value::Int(i) => Some(Json::from(*i)),
        // JSON numbers here stop at the u64 range; larger integers use repr.
        Value::LongInt(n) => n.to_u64().map(Json::from),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number),
        Value::Str(s) => Some(Json::String(s.to_string())),
        Value::Tuple(items) => items
            .iter()
            .map(|item| to_json(item, seen, depth + 1))
            .collect::<Option<Vec<_>>>()
            .map(Json::Array),
        Value::List(list) => {
            // Self-referencing containers have no JSON form.
            if !seen.insert(list.addr()) {
                return None;
            }
            let items = list.snapshot();
            let rendered = items
                .iter()
                .map(|item| to_json(item, seen, depth + 1))
                .collect::<Option<Vec<_>>>()
                .map(Json::Array);
            seen.remove(&list.addr());
            rendered
        }
        Value::Dict(dict) => {
            if !seen.insert(dict.addr()) {
                return None;
            }
            let entries = dict.snapshot();
            let rendered = entries
                .values()
                .map(|(key, item)| match key {
                    Value::Str(k) => to_json(item, seen, depth + 1).map(|v| (k.to_string(), v)),
                    _ => None,
                })
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Json::Object);
            seen.remove(&dict.addr());
            rendered
        }
        _ => None,
    }
}

/// JSON rendering of an evaluation's trailing value: natural JSON form,
/// else its `repr` string, else `null` when there is no value.
pub fn render_value(evaluation: &Evaluation) -> serde_json::Value {
    match (&evaluation.value, &evaluation.repr) {
        (None, _) => serde_json::Value::Null,
        (Some(value), repr) => value_to_json(value).unwrap_or_else(|| {
            serde_json::Value::String(repr.clone().unwrap_or_else(|| value.plain_repr()))
        }),
    }
}

// ---------------------------------------------------------------------------
// Legacy protocol
// ---------------------------------------------------------------------------

/// Reply to `GET /ping`.
#[derive(Debug, Clone, Serialize)]
pub struct PingResponse {
    pub result: &'static str,
    pub reply: &'static str,
}

impl PingResponse {
    pub fn pong() -> Self {
        Self {
            result: "ok",
            reply: "pong",
        }
    }
}

/// Body of `POST /evalChunk`.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyEvalRequest {
    pub sid: String,
    pub src: String,
}

/// Body of `POST /deleteSession`.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacySessionRequest {
    pub sid: String,
}

/// Reply carrying a session ID (`/newSession`, `/deleteSession`).
#[derive(Debug, Clone, Serialize)]
pub struct LegacySessionResponse {
    pub result: &'static str,
    pub sid: String,
}

impl LegacySessionResponse {
    pub fn new(id: SessionId) -> Self {
        Self {
            result: "ok",
            sid: id.to_string(),
        }
    }
}

/// Successful reply to `/evalChunk`.
#[derive(Debug, Clone, Serialize)]
pub struct LegacyEvalResponse {
    pub result: &'static str,
    /// Trailing value, `null` when the chunk had none.
    pub expr_result: serde_json::Value,
    /// Type name of the trailing value, `null` when the chunk had none.
    pub expr_type: Option<String>,
    /// Text printed by the chunk.
    pub output: String,
}

impl LegacyEvalResponse {
    pub fn from_evaluation(evaluation: &Evaluation) -> Self {
        Self {
            result: "ok",
            expr_result: render_value(evaluation),
            expr_type: evaluation.type_name(),
            output: evaluation.output.clone(),
        }
    }
}

/// Failure reply of the legacy protocol.
#[derive(Debug, Clone, Serialize)]
pub struct LegacyErrorResponse {
    pub result: &'static str,
    pub error: String,
    /// One of `not_found`, `parse`, `evaluation`, `internal`.
    pub kind: &'static str,
}

impl LegacyErrorResponse {
    pub fn new(kind: &'static str, error: impl Into<String>) -> Self {
        Self {
            result: "error",
            error: error.into(),
            kind,
        }
    }

    pub fn from_error(err: &ReplTunnelError) -> Self {
        let kind = match err {
            ReplTunnelError::SessionNotFound(_) => "not_found",
            ReplTunnelError::Parse(_) => "parse",
            ReplTunnelError::Evaluation(_) => "evaluation",
            _ => "internal",
        };
        Self::new(kind, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// REST API
// ---------------------------------------------------------------------------

/// Response for session creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    /// The assigned session ID.
    pub session_id: String,
}

impl CreateSessionResponse {
    pub fn new(id: SessionId) -> Self {
        Self {
            session_id: id.to_string(),
        }
    }
}

/// One scope binding.
#[derive(Debug, Clone, Serialize)]
pub struct VariableResponse {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub repr: String,
}

impl From<VariableInfo> for VariableResponse {
    fn from(info: VariableInfo) -> Self {
        Self {
            name: info.name,
            type_name: info.type_name,
            repr: info.repr,
        }
    }
}

/// Response for session status query.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    /// Session ID.
    pub session_id: String,
    /// Total chunks evaluated.
    pub execution_count: u64,
    /// Idle duration in seconds.
    pub idle_seconds: f64,
    /// Age of the session in seconds.
    pub age_seconds: f64,
    /// Scope bindings, sorted by name.
    pub variables: Vec<VariableResponse>,
}

impl SessionStatusResponse {
    pub fn from_session(session: &Session) -> crate::Result<Self> {
        let variables = session
            .snapshot()?
            .into_iter()
            .map(VariableResponse::from)
            .collect();
        Ok(Self {
            session_id: session.id.to_string(),
            execution_count: session.execution_count(),
            idle_seconds: session.idle_duration().as_secs_f64(),
            age_seconds: session.created_at.elapsed().as_secs_f64(),
            variables,
        })
    }
}

/// Request to evaluate a chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalRequest {
    /// Source text of the chunk.
    pub src: String,
}

/// Response for a successful evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct EvalResponse {
    /// Whether the chunk ended in a trailing expression.
    pub has_value: bool,
    /// Trailing value as JSON, or its `repr` when it has no JSON form.
    pub value: serde_json::Value,
    /// `repr()` of the trailing value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repr: Option<String>,
    /// Type name of the trailing value.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Text printed by the chunk.
    pub output: String,
    /// Evaluation duration in milliseconds.
    pub duration_ms: u64,
}

impl EvalResponse {
    pub fn from_evaluation(evaluation: &Evaluation, duration_ms: u64) -> Self {
        Self {
            has_value: evaluation.value.is_some(),
            value: render_value(evaluation),
            repr: evaluation.repr.clone(),
            type_name: evaluation.type_name(),
            output: evaluation.output.clone(),
            duration_ms,
        }
    }
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "SESSION_NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Source line the error points at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Source column, for parse errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Text printed before an evaluation fault.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            line: None,
            column: None,
            output: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new("SESSION_NOT_FOUND", format!("Session '{}' not found", id))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn from_error(err: &ReplTunnelError) -> Self {
        match err {
            ReplTunnelError::SessionNotFound(id) => Self::session_not_found(id),
            ReplTunnelError::Parse(e) => Self {
                line: Some(e.line),
                column: Some(e.column),
                ..Self::new("PARSE_ERROR", e.message.clone())
            },
            ReplTunnelError::Evaluation(e) => Self {
                line: e.line,
                output: Some(e.output.clone()).filter(|o| !o.is_empty()),
                ..Self::new("EVALUATION_ERROR", e.message.clone()).with_details(e.kind.clone())
            },
            other => Self::internal_error(other.to_string()),
        }
    }
}

/// WebSocket message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client sends a chunk to evaluate.
    Eval { src: String },
    /// Server sends the evaluation result.
    Result {
        value: serde_json::Value,
        #[serde(default)]
        repr: Option<String>,
        #[serde(default)]
        value_type: Option<String>,
        output: String,
        duration_ms: u64,
    },
    /// Error message.
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },
    /// Ping/pong for connection health.
    Ping,
    Pong,
}

impl WsMessage {
    pub fn from_evaluation(evaluation: &Evaluation, duration_ms: u64) -> Self {
        WsMessage::Result {
            value: render_value(evaluation),
            repr: evaluation.repr.clone(),
            value_type: evaluation.type_name(),
            output: evaluation.output.clone(),
            duration_ms,
        }
    }

    pub fn from_error(err: &ReplTunnelError) -> Self {
        let response = ErrorResponse::from_error(err);
        let message = match response.details {
            Some(kind) => format!("{}: {}", kind, response.message),
            None => response.message,
        };
        WsMessage::Error {
            code: response.code,
            message,
            line: response.line,
        }
    }
}

/// List sessions response.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Total number of sessions.
    pub count: usize,
    /// Session summaries.
    pub sessions: Vec<SessionSummary>,
}

/// Brief session summary for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub execution_count: u64,
    pub idle_seconds: f64,
}

impl SessionSummary {
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.to_string(),
            execution_count: session.execution_count(),
            idle_seconds: session.idle_duration().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{EvalError, ParseError};
    use num_bigint::BigInt;
    use serde_json::json;
    use std::sync::Arc;

    fn evaluation(value: Option<Value>) -> Evaluation {
        Evaluation {
            repr: value.as_ref().map(Value::plain_repr),
            value,
            output: String::new(),
        }
    }

    #[test]
    fn test_value_to_json_scalars() {
        assert_eq!(value_to_json(&Value::None), Some(json!(null)));
        assert_eq!(value_to_json(&Value::Bool(true)), Some(json!(true)));
        assert_eq!(value_to_json(&Value::Int(10)), Some(json!(10)));
        assert_eq!(value_to_json(&Value::Float(10.3)), Some(json!(10.3)));
        assert_eq!(value_to_json(&Value::str("hi")), Some(json!("hi")));
        assert_eq!(value_to_json(&Value::Float(f64::NAN)), None);
    }

    #[test]
    fn test_value_to_json_long_integers() {
        let max = Value::LongInt(Arc::new(BigInt::from(u64::MAX)));
        assert_eq!(value_to_json(&max), Some(json!(18446744073709551615u64)));

        let beyond = Value::LongInt(Arc::new(BigInt::from(u64::MAX) + 1));
        assert_eq!(value_to_json(&beyond), None);
        let eval = evaluation(Some(beyond));
        assert_eq!(render_value(&eval), json!("18446744073709551616"));
    }

    #[test]
    fn test_value_to_json_float_stays_float() {
        let rendered = value_to_json(&Value::Float(2.0)).unwrap();
        assert!(rendered.is_f64());
    }

    #[test]
    fn test_value_to_json_containers() {
        let list = Value::list(vec![Value::Int(1), Value::tuple(vec![Value::str("a")])]);
        assert_eq!(value_to_json(&list), Some(json!([1, ["a"]])));
    }

    #[test]
    fn test_value_to_json_self_reference() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(inner) = &list {
            inner.lock().push(list.clone());
        }
        assert_eq!(value_to_json(&list), None);
    }

    #[test]
    fn test_render_value_fallback_to_repr() {
        let eval = evaluation(Some(Value::Ellipsis));
        assert_eq!(render_value(&eval), json!("Ellipsis"));

        let eval = evaluation(None);
        assert_eq!(render_value(&eval), json!(null));
    }

    #[test]
    fn test_legacy_eval_response_absent_value() {
        let response = LegacyEvalResponse::from_evaluation(&evaluation(None));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["result"], "ok");
        assert_eq!(json["expr_result"], json!(null));
        assert_eq!(json["expr_type"], json!(null));
    }

    #[test]
    fn test_legacy_error_kinds() {
        let err = ReplTunnelError::SessionNotFound("abc".into());
        assert_eq!(LegacyErrorResponse::from_error(&err).kind, "not_found");

        let err: ReplTunnelError = ParseError::new(1, 1, "invalid syntax").into();
        assert_eq!(LegacyErrorResponse::from_error(&err).kind, "parse");

        let err: ReplTunnelError = EvalError::new("NameError", "name 'x' is not defined").into();
        let response = LegacyErrorResponse::from_error(&err);
        assert_eq!(response.kind, "evaluation");
        assert_eq!(response.result, "error");
        assert!(response.error.contains("NameError"));
    }

    #[test]
    fn test_error_response_serialization() {
        let err = ErrorResponse::new("TEST_ERROR", "Test message");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("TEST_ERROR"));
        assert!(json.contains("Test message"));
        assert!(!json.contains("details")); // skip_serializing_if
        assert!(!json.contains("line"));
    }

    #[test]
    fn test_error_response_from_parse_error() {
        let err: ReplTunnelError = ParseError::new(2, 4, "unexpected indent").into();
        let response = ErrorResponse::from_error(&err);
        assert_eq!(response.code, "PARSE_ERROR");
        assert_eq!(response.line, Some(2));
        assert_eq!(response.column, Some(4));
    }

    #[test]
    fn test_eval_request() {
        let req: EvalRequest = serde_json::from_str(r#"{"src": "1 + 1"}"#).unwrap();
        assert_eq!(req.src, "1 + 1");
    }

    #[test]
    fn test_ws_message_eval() {
        let msg = WsMessage::Eval {
            src: "x = 1".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"eval\""));
        assert!(json.contains("x = 1"));
    }

    #[test]
    fn test_ws_message_from_error() {
        let err: ReplTunnelError = EvalError::new("ZeroDivisionError", "division by zero").into();
        match WsMessage::from_error(&err) {
            WsMessage::Error { code, message, .. } => {
                assert_eq!(code, "EVALUATION_ERROR");
                assert_eq!(message, "ZeroDivisionError: division by zero");
            }
            other => panic!("Expected Error message, got {:?}", other),
        }
    }
}
