//! Webhook routes and the health report, driven through `tower::ServiceExt`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use cpthook::config::Config;
use cpthook::dispatch::{self, QueueReceiver};
use cpthook::http::{router, AppState};
use cpthook::input::modules_from_config;
use cpthook::irc::{ConnectionState, ConnectionStatus};

const CONFIG: &str = r##"
[irc]
host = "irc.example.net"
nickname = "cpthook"

[modules.gitlab]
type = "gitlab"
default = "#dev"

[modules.gitlab.groups]
"teams/infra" = ["#infra"]

[modules.notes]
type = "simple"
default_channel = "#notes"
endpoint = "/hooks/notes"
"##;

struct TestApp {
    router: Router,
    queue: QueueReceiver,
    status: watch::Sender<ConnectionStatus>,
}

fn app() -> TestApp {
    let config = match Config::from_toml(CONFIG) {
        Ok(config) => config,
        Err(e) => panic!("config should parse: {e}"),
    };
    let modules = match modules_from_config(&config) {
        Ok(modules) => modules,
        Err(e) => panic!("modules should build: {e}"),
    };
    let (tx, rx) = dispatch::bounded();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

    let state = AppState {
        modules: Arc::new(modules),
        queue: tx,
        status: status_rx,
    };
    TestApp {
        router: router(state),
        queue: rx,
        status: status_tx,
    }
}

fn post(uri: &str, event: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(event) = event {
        builder = builder.header("X-Gitlab-Event", event);
    }
    match builder.body(Body::from(body)) {
        Ok(request) => request,
        Err(e) => panic!("request should build: {e}"),
    }
}

async fn call(router: Router, request: Request<Body>) -> Response {
    match router.oneshot(request).await {
        Ok(response) => response,
        Err(e) => panic!("router is infallible: {e}"),
    }
}

async fn body_text(response: Response) -> String {
    match to_bytes(response.into_body(), usize::MAX).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => panic!("body should read: {e}"),
    }
}

fn pipeline_failed() -> String {
    json!({
        "object_attributes": {
            "id": 5,
            "sha": "abcdef0123456789",
            "status": "failed",
            "duration": 30
        },
        "project": {
            "name": "tool",
            "path_with_namespace": "teams/infra/tool",
            "web_url": "https://git.example.com/teams/infra/tool"
        }
    })
    .to_string()
}

#[tokio::test]
async fn gitlab_hook_is_queued_for_routed_channel() {
    let mut app = app();
    let response = call(
        app.router.clone(),
        post("/gitlab", Some("Pipeline Hook"), pipeline_failed()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = match serde_json::from_str(&body_text(response).await) {
        Ok(body) => body,
        Err(e) => panic!("response should be json: {e}"),
    };
    assert_eq!(body["queued"], 1);

    match app.queue.dequeue().await {
        Some(msg) => {
            assert_eq!(msg.destination(), "#infra");
            assert!(msg.lines()[0].contains("Pipeline for commit abcdef0"));
        }
        None => panic!("message should be queued"),
    }
}

#[tokio::test]
async fn ignored_event_queues_nothing() {
    let app = app();
    let running = pipeline_failed().replace("failed", "running");
    let response = call(app.router, post("/gitlab", Some("Pipeline Hook"), running)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"queued":0}"#);
}

#[tokio::test]
async fn malformed_payload_is_bad_request() {
    let app = app();
    let response = call(
        app.router,
        post("/gitlab", Some("Pipeline Hook"), "{oops".to_owned()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("failed to decode payload"));
}

#[tokio::test]
async fn missing_event_header_is_bad_request() {
    let app = app();
    let response = call(app.router, post("/gitlab", None, pipeline_failed())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn custom_endpoint_and_query_channel() {
    let mut app = app();
    let response = call(
        app.router.clone(),
        post("/hooks/notes?channel=%23deploys", None, "shipped".to_owned()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    match app.queue.dequeue().await {
        Some(msg) => {
            assert_eq!(msg.destination(), "#deploys");
            assert_eq!(msg.lines(), ["shipped"]);
        }
        None => panic!("message should be queued"),
    }
}

#[tokio::test]
async fn invalid_query_channel_is_bad_request() {
    let mut app = app();
    let response = call(
        app.router.clone(),
        post("/hooks/notes?channel=0", None, "part everything".to_owned()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("invalid channel"));

    drop(app.router);
    assert!(app.queue.dequeue().await.is_none());
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = app();
    let response = call(app.router, post("/notes", None, "hi".to_owned())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stopped_manager_is_service_unavailable() {
    let TestApp { router, queue, .. } = app();
    drop(queue);

    let response = call(router, post("/hooks/notes", None, "late".to_owned())).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_reports_connection_state() {
    let app = app();
    app.status.send_replace(ConnectionStatus {
        state: ConnectionState::Ready,
        joined: ["#dev".to_owned(), "#infra".to_owned()].into_iter().collect(),
    });

    let request = match Request::builder().uri("/health").body(Body::empty()) {
        Ok(request) => request,
        Err(e) => panic!("request should build: {e}"),
    };
    let response = call(app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = match serde_json::from_str(&body_text(response).await) {
        Ok(body) => body,
        Err(e) => panic!("response should be json: {e}"),
    };
    assert_eq!(body["state"], "ready");
    assert_eq!(body["joined"], json!(["#dev", "#infra"]));
    assert!(body["version"]
        .as_str()
        .is_some_and(|v| v.starts_with("cpthook ")));
}
