use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, FixedOffset};
use serde_json::{json, Value};
use tower::ServiceExt;

use exec_relay::fallback::LocalExecutor;
use exec_relay::http_server::router;
use exec_relay::orchestrator::Orchestrator;
use exec_relay::state::AppState;
use exec_relay::store::{RecordStore, SqliteStore};

async fn app() -> (Router, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let orchestrator = Orchestrator::new(store.clone(), None, LocalExecutor::default());
    let state = AppState::new(store.clone(), orchestrator);
    (router(state), store)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_root_is_fixed() {
    let (app, store) = app().await;
    for uri in ["/api/", "/api"] {
        let (status, body) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Hello World" }));
    }
    assert!(store.list_health_checks().await.unwrap().is_empty());
    assert!(store.list_recent_executions(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_create_then_list() {
    let (app, _store) = app().await;

    let (status, created) = send(&app, "POST", "/api/status", Some(json!({ "client_name": "uptime-monitor" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["client_name"], "uptime-monitor");
    assert!(created["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(created["timestamp"].is_string());

    let (status, listed) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], created);
}

#[tokio::test]
async fn test_execute_python_locally() {
    let (app, store) = app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/execute",
        Some(json!({ "code": "print(\"hi\")", "language": "python" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "hi\n");
    assert_eq!(body["error"], Value::Null);
    assert!(body["execution_time"].as_f64().is_some_and(|t| t >= 0.0));

    assert_eq!(store.list_recent_executions(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_execute_defaults_to_python() {
    let (app, _store) = app().await;
    let (status, body) = send(&app, "POST", "/api/execute", Some(json!({ "code": "print(6 * 7)" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "42\n");
}

#[tokio::test]
async fn test_execute_runtime_error_is_200() {
    let (app, _store) = app().await;
    let (status, body) = send(&app, "POST", "/api/execute", Some(json!({ "code": "1/0" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "");
    assert!(body["error"].as_str().unwrap().contains("ZeroDivisionError"));
}

#[tokio::test]
async fn test_execute_ruby_placeholder() {
    let (app, _store) = app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/execute",
        Some(json!({ "code": "puts 1", "language": "ruby" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["output"],
        "Code execution for ruby would be handled by the remote sandbox.\nCode to execute:\nputs 1"
    );
    assert_eq!(body["error"], Value::Null);
}

#[tokio::test]
async fn test_executions_lists_ten_newest_first() {
    let (app, _store) = app().await;
    for i in 0..12 {
        let (status, _) = send(
            &app,
            "POST",
            "/api/execute",
            Some(json!({ "code": format!("print({})", i) })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, "GET", "/api/executions", None).await;
    assert_eq!(status, StatusCode::OK);
    let executions = body["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 10);
    assert_eq!(executions[0]["code"], "print(11)");
    assert_eq!(executions[9]["code"], "print(2)");

    let timestamps: Vec<DateTime<FixedOffset>> = executions
        .iter()
        .map(|e| DateTime::parse_from_rfc3339(e["timestamp"].as_str().unwrap()).unwrap())
        .collect();
    assert!(timestamps.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_store_outage_returns_500_with_detail() {
    let (app, store) = app().await;
    store.close().await;

    let (status, body) = send(&app, "POST", "/api/execute", Some(json!({ "code": "print(1)" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().starts_with("Failed to execute code: "));

    let (status, body) = send(&app, "GET", "/api/executions", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Failed to fetch execution history: "));

    let (status, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_health() {
    let (app, _store) = app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}
