
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use runner_rpc::api::{router, ApiState};
use runner_rpc::dispatcher::{Dispatcher, JobPhase};
use test_harness::{wait_for_terminal, TestEnv};

fn create_test_app(env: &TestEnv) -> (Router, Dispatcher) {
    let dispatcher = env.start();
    let state = ApiState {
        dispatcher: dispatcher.clone(),
        logs: env.log_reader(),
    };
    (router(state), dispatcher)
}

async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Body) -> Value {
    let (status, body) = send(app, method, uri, body).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_status_endpoint_idle() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);

    let json = send_json(&app, Method::GET, "/", Body::empty()).await;

    assert_eq!(
        json,
        json!({"id": "", "status": "idle", "pid": null, "returncode": null, "error": null})
    );
}

#[tokio::test]
async fn test_submit_then_poll_until_completed() {
    let env = TestEnv::new();
    let (app, dispatcher) = create_test_app(&env);
    let script = env.script("hello", "echo hello\necho world\n");
    let body = json!({"id": "step-1", "path": script}).to_string();

    let submitted = send_json(&app, Method::POST, "/", Body::from(body)).await;
    assert_eq!(submitted["id"], "step-1");
    assert_eq!(submitted["status"], "pending");

    wait_for_terminal(&dispatcher).await;

    let status = send_json(&app, Method::GET, "/", Body::empty()).await;
    assert_eq!(status["id"], "step-1");
    assert_eq!(status["status"], "completed");
    assert_eq!(status["returncode"], 0);
    assert!(status["pid"].is_u64());

    let logs = send_json(&app, Method::GET, "/logs?id=step-1", Body::empty()).await;
    assert_eq!(logs, json!(["hello\n", "world\n"]));
}

#[tokio::test]
async fn test_submit_missing_fields() {
    let env = TestEnv::new();
    let (app, dispatcher) = create_test_app(&env);

    for body in [json!({"id": "x"}), json!({"path": "/bin/true"}), json!({})] {
        let json = send_json(&app, Method::POST, "/", Body::from(body.to_string())).await;
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "Missing id or path in request");
    }

    // The dispatcher was never involved
    assert_eq!(dispatcher.current_status().phase, JobPhase::Idle);
}

#[tokio::test]
async fn test_submit_invalid_json_is_bad_request() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);

    let (status, _) = send(&app, Method::POST, "/", Body::from("not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejected_while_busy() {
    let env = TestEnv::new();
    let (app, dispatcher) = create_test_app(&env);
    let slow = env.script("slow", "sleep 1\n");

    let a = json!({"id": "a", "path": slow}).to_string();
    let b = json!({"id": "b", "path": slow}).to_string();
    let first = send_json(&app, Method::POST, "/", Body::from(a)).await;
    let second = send_json(&app, Method::POST, "/", Body::from(b)).await;

    assert_eq!(first["status"], "pending");
    assert_eq!(second["id"], "b");
    assert_eq!(second["status"], "failed");
    assert_eq!(second["returncode"], -1);
    assert!(second["error"].as_str().unwrap().contains("(ID a)"));

    let done = wait_for_terminal(&dispatcher).await;
    assert_eq!(done.id, "a");
}

#[tokio::test]
async fn test_cancel_without_job() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);

    let json = send_json(&app, Method::DELETE, "/", Body::empty()).await;

    assert_eq!(json["id"], "");
    assert_eq!(json["status"], "failed");
    assert_eq!(json["error"], "No job has been started yet");
}

#[tokio::test]
async fn test_cancel_running_job() {
    let env = TestEnv::new();
    let (app, dispatcher) = create_test_app(&env);
    let script = env.script("long", "sleep 30\n");
    let body = json!({"id": "long", "path": script}).to_string();

    send_json(&app, Method::POST, "/", Body::from(body)).await;
    let running =
        test_harness::wait_until(&dispatcher, |s| s.phase == JobPhase::Running).await;

    let json = send_json(&app, Method::DELETE, "/", Body::empty()).await;
    assert_eq!(json["status"], "cancelling");
    assert_eq!(json["pid"], running.pid.unwrap());

    let done = wait_for_terminal(&dispatcher).await;
    assert_eq!(done.phase, JobPhase::Completed);
}

#[tokio::test]
async fn test_logs_requires_id() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);

    let (status, body) = send(&app, Method::GET, "/logs", Body::empty()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"Missing id in request");
}

#[tokio::test]
async fn test_logs_rejects_non_integer_range() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);

    let (status, _) = send(&app, Method::GET, "/logs?id=a&fromLine=abc", Body::empty()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logs_rejects_path_like_id() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);

    let (status, _) = send(&app, Method::GET, "/logs?id=..%2Fetc", Body::empty()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logs_window_and_unknown_job() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);
    std::fs::write(env.config.output_path("w"), "a\nb\nc\nd\npartial").unwrap();

    let window = send_json(&app, Method::GET, "/logs?id=w&fromLine=1&maxLines=2", Body::empty()).await;
    assert_eq!(window, json!(["b\n", "c\n"]));

    let tail = send_json(&app, Method::GET, "/logs?id=w&fromLine=2", Body::empty()).await;
    assert_eq!(tail, json!(["c\n", "d\n"]));

    let unknown = send_json(&app, Method::GET, "/logs?id=nobody", Body::empty()).await;
    assert_eq!(unknown, json!([]));
}

#[tokio::test]
async fn test_health_endpoint() {
    let env = TestEnv::new();
    let (app, _dispatcher) = create_test_app(&env);

    let json = send_json(&app, Method::GET, "/health", Body::empty()).await;

    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}
