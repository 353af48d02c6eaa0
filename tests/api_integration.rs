//! HTTP surface: status codes, JSON bodies and the SSE stream.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};

use common::{Behavior, FakeProvider, Harness, collect, harness, model, test_config};
use search_orchestrator::AppState;
use search_orchestrator::config::{AppConfig, WorkflowConfig};
use search_orchestrator::providers::SearchProvider;
use search_orchestrator::server::build_router;

fn server(h: &Harness) -> TestServer {
    let state = AppState {
        orchestrator: Arc::new(h.system.clone()),
        config: Arc::new(AppConfig::default()),
    };
    TestServer::new(build_router(state)).unwrap()
}

fn tavily(behavior: Behavior) -> Vec<Arc<dyn SearchProvider>> {
    vec![FakeProvider::new("tavily", behavior) as Arc<dyn SearchProvider>]
}

#[tokio::test]
async fn test_start_stream_and_fetch_run() {
    let h = harness(test_config(), tavily(Behavior::Results(3)), model());
    let server = server(&h);

    let response = server
        .post("/api/search")
        .json(&json!({ "query": "what is quantum computing" }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    let run_id = body["runId"].as_str().unwrap().to_string();
    assert_eq!(body["streamUrl"], format!("/api/search/{run_id}/stream"));

    let events = collect(&h.system, &run_id, None).await;
    assert_eq!(events.last().unwrap().event_type, "workflow_completed");

    // The finished run's stream replays and ends.
    let sse = server.get(&format!("/api/search/{run_id}/stream")).await;
    sse.assert_status_ok();
    let text = sse.text();
    assert!(text.contains("workflow_started"));
    assert!(text.contains("workflow_completed"));

    let run: Value = server.get(&format!("/api/search/{run_id}")).await.json();
    assert_eq!(run["status"], "completed");
    assert_eq!(run["searchPath"], "standard");

    let progress: Value = server
        .get(&format!("/api/search/{run_id}/progress"))
        .add_query_param("after", 1)
        .await
        .json();
    let progress = progress.as_array().unwrap();
    assert_eq!(progress.len(), events.len() - 1);
    assert_eq!(progress[0]["seq"], 2);
}

#[tokio::test]
async fn test_error_status_codes() {
    let h = harness(test_config(), tavily(Behavior::Hang), model());
    let server = server(&h);

    let response = server
        .post("/api/search")
        .json(&json!({ "query": "" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "invalid_input_error");

    server
        .get("/api/search/unknown")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/api/search/unknown/review")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let request = json!({ "query": "what is quantum computing", "runId": "dup" });
    server
        .post("/api/search")
        .json(&request)
        .await
        .assert_status(StatusCode::ACCEPTED);
    let response = server.post("/api/search").json(&request).await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["kind"], "conflict_error");

    server
        .post("/api/search/dup/cancel")
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_missing_credentials_is_unavailable() {
    let h = harness(test_config(), Vec::new(), None);
    let server = server(&h);

    let response = server
        .post("/api/search")
        .json(&json!({ "query": "what is quantum computing" }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["kind"], "missing_api_keys");
}

#[tokio::test]
async fn test_review_and_resume_over_http() {
    let config = WorkflowConfig {
        human_review: true,
        ..test_config()
    };
    let h = harness(config, tavily(Behavior::Results(4)), model());
    let server = server(&h);

    let body: Value = server
        .post("/api/search")
        .json(&json!({ "query": "what is quantum computing" }))
        .await
        .json();
    let run_id = body["runId"].as_str().unwrap().to_string();
    let paused = collect(&h.system, &run_id, None).await;
    assert_eq!(paused.last().unwrap().event_type, "review_required");

    let review: Value = server
        .get(&format!("/api/search/{run_id}/review"))
        .await
        .json();
    assert_eq!(review["stepId"], "review");
    assert_eq!(review["data"]["searchResults"].as_array().unwrap().len(), 4);

    server
        .post(&format!("/api/search/{run_id}/resume"))
        .json(&json!({ "selectedIndices": [9] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .post(&format!("/api/search/{run_id}/resume"))
        .json(&json!({ "selectedIndices": [3] }))
        .await;
    response.assert_status_ok();
    let outcome: Value = response.json();
    assert_eq!(outcome["firstResume"], true);

    let rest = collect(&h.system, &run_id, Some(paused.last().unwrap().seq)).await;
    assert_eq!(rest.last().unwrap().event_type, "workflow_completed");

    let repeat: Value = server
        .post(&format!("/api/search/{run_id}/resume"))
        .json(&json!({ "selectedIndices": [0] }))
        .await
        .json();
    assert_eq!(repeat["firstResume"], false);
    assert_eq!(repeat["resumePayload"], json!({ "selectedIndices": [3] }));
}

#[tokio::test]
async fn test_router_serves_health_without_a_listener() {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let h = harness(test_config(), tavily(Behavior::Results(1)), model());
    let router = build_router(AppState {
        orchestrator: Arc::new(h.system.clone()),
        config: Arc::new(AppConfig::default()),
    });

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
