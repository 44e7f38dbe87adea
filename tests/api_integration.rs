//! API integration tests.
//!
//! These tests drive the complete router end-to-end using axum's test utilities.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use repl_tunnel::api::{create_router, create_router_with_state, AppState};
use tower::ServiceExt;

/// Helper to create a JSON request.
fn json_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    match body {
        Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Helper to extract body as string.
async fn response_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&body).to_string()
}

/// Helper to extract JSON from response.
async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

/// Send one request and return status plus JSON body.
async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(json_request(method, uri, body))
        .await
        .unwrap();
    let status = response.status();
    (status, response_json(response).await)
}

/// Create a session over the legacy protocol and return its ID.
async fn legacy_session(app: &Router) -> String {
    let (status, json) = send(app, Method::POST, "/newSession", None).await;
    assert_eq!(status, StatusCode::OK);
    json["sid"].as_str().unwrap().to_string()
}

/// Create a session over the REST API and return its ID.
async fn rest_session(app: &Router) -> String {
    let (status, json) = send(app, Method::POST, "/api/v1/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    json["session_id"].as_str().unwrap().to_string()
}

async fn eval_chunk(app: &Router, sid: &str, src: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/evalChunk",
        Some(json!({ "sid": sid, "src": src })),
    )
    .await
}

// ============================================================================
// Health & Info Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_router();

    let response = app
        .oneshot(json_request(Method::GET, "/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_text(response).await, "OK");
}

#[tokio::test]
async fn test_api_info_endpoint() {
    let app = create_router_with_state(AppState::new());

    let (status, json) = send(&app, Method::GET, "/api/v1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "repl-tunnel");
    assert_eq!(json["status"], "running");
}

// ============================================================================
// Legacy Protocol Tests
// ============================================================================

#[tokio::test]
async fn test_ping() {
    let app = create_router();

    let (status, json) = send(&app, Method::GET, "/ping", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"result": "ok", "reply": "pong"}));
}

#[tokio::test]
async fn test_new_session_returns_hex_id() {
    let app = create_router();

    let sid = legacy_session(&app).await;

    assert_eq!(sid.len(), 16);
    assert!(sid.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn test_eval_chunk_assignment_has_no_value() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let (status, json) = eval_chunk(&app, &sid, "a = 0").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "ok");
    assert_eq!(json["expr_result"], Value::Null);
    assert_eq!(json["expr_type"], Value::Null);
}

#[tokio::test]
async fn test_eval_chunk_trailing_expression() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let (_, json) = eval_chunk(&app, &sid, "a = 10\na").await;
    assert_eq!(json["expr_result"], json!(10));
    assert_eq!(json["expr_type"], "int");

    let (_, json) = eval_chunk(&app, &sid, "a = 10.3\na").await;
    assert_eq!(json["expr_result"], json!(10.3));
    assert_eq!(json["expr_type"], "float");
}

#[tokio::test]
async fn test_eval_chunk_scope_persists() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    eval_chunk(&app, &sid, "a = 0").await;
    eval_chunk(&app, &sid, "b = 0").await;
    eval_chunk(&app, &sid, "def inc(n):\n    return n + 1\n").await;

    let (status, json) = eval_chunk(&app, &sid, "[a, b, inc(41)]").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["expr_result"], json!([0, 0, 42]));
    assert_eq!(json["expr_type"], "list");
}

#[tokio::test]
async fn test_eval_chunk_captures_output() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let (_, json) = eval_chunk(&app, &sid, "for i in range(3):\n    print(i)\n").await;

    assert_eq!(json["output"], "0\n1\n2\n");
    assert_eq!(json["expr_result"], Value::Null);
}

#[tokio::test]
async fn test_eval_chunk_non_json_value_uses_repr() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let src = "class Point:\n    def __init__(self, x):\n        self.x = x\n    def __repr__(self):\n        return f'Point({self.x})'\nPoint(3)";
    let (_, json) = eval_chunk(&app, &sid, src).await;

    assert_eq!(json["expr_result"], "Point(3)");
    assert_eq!(json["expr_type"], "Point");
}

#[tokio::test]
async fn test_eval_chunk_parse_error() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let (status, json) = eval_chunk(&app, &sid, "x = (1,").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["result"], "error");
    assert_eq!(json["kind"], "parse");
}

#[tokio::test]
async fn test_eval_chunk_evaluation_error_keeps_partial_state() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let (status, json) = eval_chunk(&app, &sid, "before = 1\n1 / 0\nafter = 2").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["kind"], "evaluation");
    assert!(json["error"].as_str().unwrap().contains("ZeroDivisionError"));

    let (_, json) = eval_chunk(&app, &sid, "before").await;
    assert_eq!(json["expr_result"], json!(1));

    let (status, json) = eval_chunk(&app, &sid, "after").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("NameError"));
}

#[tokio::test]
async fn test_eval_chunk_unknown_session() {
    let app = create_router();

    let (status, json) = eval_chunk(&app, "00000000000000ff", "1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");

    let (status, _) = eval_chunk(&app, "not-an-id", "1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_session_legacy() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let (status, json) = send(
        &app,
        Method::POST,
        "/deleteSession",
        Some(json!({ "sid": sid })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sid"], sid.as_str());

    // Double delete is an error
    let (status, json) = send(
        &app,
        Method::POST,
        "/deleteSession",
        Some(json!({ "sid": sid })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");

    let (status, _) = eval_chunk(&app, &sid, "1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Session Management Tests
// ============================================================================

#[tokio::test]
async fn test_list_sessions_empty() {
    let app = create_router_with_state(AppState::new());

    let (status, json) = send(&app, Method::GET, "/api/v1/sessions", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["sessions"].is_array());
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn test_create_and_list_sessions() {
    let app = create_router_with_state(AppState::new());

    let first = rest_session(&app).await;
    let second = legacy_session(&app).await;

    let (_, json) = send(&app, Method::GET, "/api/v1/sessions", None).await;
    assert_eq!(json["count"], 2);

    let ids: Vec<&str> = json["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["session_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));
}

#[tokio::test]
async fn test_rest_eval_and_variables() {
    let app = create_router();
    let id = rest_session(&app).await;
    let eval_uri = format!("/api/v1/sessions/{}/eval", id);

    let (status, json) = send(
        &app,
        Method::POST,
        &eval_uri,
        Some(json!({ "src": "n = 3\ns = 'hi'\nn * 2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["has_value"], true);
    assert_eq!(json["value"], json!(6));
    assert_eq!(json["repr"], "6");
    assert_eq!(json["type"], "int");

    let (status, json) = send(&app, Method::GET, &format!("/api/v1/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["execution_count"], 1);

    let variables = json["variables"].as_array().unwrap();
    assert_eq!(variables.len(), 2);
    assert_eq!(variables[0], json!({"name": "n", "type": "int", "repr": "3"}));
    assert_eq!(variables[1], json!({"name": "s", "type": "str", "repr": "'hi'"}));
}

#[tokio::test]
async fn test_rest_eval_without_value() {
    let app = create_router();
    let id = rest_session(&app).await;

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/v1/sessions/{}/eval", id),
        Some(json!({ "src": "class A:\n    pass\nx = A" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["has_value"], false);
    assert_eq!(json["value"], Value::Null);
    assert!(json.get("type").is_none());
}

#[tokio::test]
async fn test_rest_eval_errors() {
    let app = create_router();
    let id = rest_session(&app).await;
    let eval_uri = format!("/api/v1/sessions/{}/eval", id);

    let (status, json) = send(&app, Method::POST, &eval_uri, Some(json!({ "src": "def f(:" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "PARSE_ERROR");
    assert_eq!(json["line"], 1);

    let (status, json) = send(
        &app,
        Method::POST,
        &eval_uri,
        Some(json!({ "src": "print('start')\n{}['missing']" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "EVALUATION_ERROR");
    assert_eq!(json["details"], "KeyError");
    assert_eq!(json["line"], 2);
    assert_eq!(json["output"], "start\n");
}

#[tokio::test]
async fn test_delete_session() {
    let app = create_router();
    let id = rest_session(&app).await;
    let uri = format!("/api/v1/sessions/{}", id);

    let response = app
        .clone()
        .oneshot(json_request(Method::DELETE, &uri, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, json) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_get_session_not_found() {
    let app = create_router_with_state(AppState::new());

    let (status, _) = send(&app, Method::GET, "/api/v1/sessions/0000000000099999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/v1/sessions/99999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_session_not_found() {
    let app = create_router_with_state(AppState::new());

    let (status, _) = send(&app, Method::DELETE, "/api/v1/sessions/0000000000099999", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let app = create_router();
    let first = legacy_session(&app).await;
    let second = legacy_session(&app).await;

    eval_chunk(&app, &first, "shared = 'first'").await;

    let (status, json) = eval_chunk(&app, &second, "shared").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("NameError"));
}

#[tokio::test]
async fn test_concurrent_evaluations_on_one_session() {
    let app = create_router();
    let sid = legacy_session(&app).await;
    eval_chunk(&app, &sid, "total = 0").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let app = app.clone();
        let sid = sid.clone();
        handles.push(tokio::spawn(async move {
            let (status, _) = eval_chunk(&app, &sid, "t = total\nfor _ in range(10):\n    t += 1\ntotal = t").await;
            status
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let (_, json) = eval_chunk(&app, &sid, "total").await;
    assert_eq!(json["expr_result"], json!(160));
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_invalid_json_body() {
    let app = create_router_with_state(AppState::new());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/evalChunk")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ invalid json }"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_missing_src_field() {
    let app = create_router();
    let sid = legacy_session(&app).await;

    let (status, _) = send(&app, Method::POST, "/evalChunk", Some(json!({ "sid": sid }))).await;

    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_method_not_allowed() {
    let app = create_router_with_state(AppState::new());

    let response = app
        .oneshot(json_request(Method::PUT, "/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_not_found_route() {
    let app = create_router_with_state(AppState::new());

    let response = app
        .oneshot(json_request(Method::GET, "/nonexistent", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
