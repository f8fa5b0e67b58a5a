//! HTTP API integration tests: drive the router against an in-memory host.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use agora_config::AgoraConfig;
use agora_core::{AgoraError, Params, Result, codes};
use agora_runtime::mock::MockTransport;
use agora_runtime::{Agent, AgentContext, AgentHost, AgentType, Capability, TypeTag};
use agora_state::MemoryStateFactory;
use async_trait::async_trait;
use std::sync::Arc;

const BASE: &str = "http://localhost:3800";

struct Echo;

#[async_trait]
impl Agent for Echo {
    async fn invoke(&self, _ctx: &AgentContext, method: &str, params: Params) -> Result<Value> {
        match method {
            "echo" => Ok(params.get("text").cloned().unwrap_or(Value::Null)),
            other => Err(AgoraError::MethodNotFound(other.to_string())),
        }
    }
}

impl AgentType for Echo {
    const TYPE_NAME: &'static str = "Echo";

    fn capabilities() -> Vec<Capability> {
        vec![
            Capability::new("echo")
                .param("text", TypeTag::String)
                .returns(TypeTag::String),
        ]
    }

    fn create() -> Self {
        Echo
    }
}

fn setup() -> (axum::Router, Arc<AgentHost>) {
    let mut config = AgoraConfig::default();
    config.host.public_url = Some(BASE.into());
    let states = Arc::new(MemoryStateFactory::new(Some(BASE.into())));
    let host = AgentHost::new(&config, states, Arc::new(MockTransport::new()));
    host.register::<Echo>();
    (agora_server::build_router(Arc::clone(&host)), host)
}

/// Helper to read the full body bytes from a response.
async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_str(&body_string(resp).await).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Health & Metrics ───────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup();
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();
    let req = Request::get("/metrics").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(ct.contains("text/plain"));
    let body = body_string(resp).await;
    assert!(body.contains("agora_rpc_requests_total"));
}

// ── Calls ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_call_creates_agent() {
    let (app, host) = setup();
    let req = post(
        "/agents/Echo/e1/",
        r#"{"id": 1, "method": "echo", "params": {"text": "hi"}}"#,
    );
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({"id": 1, "result": "hi"}));
    assert!(host.states().exists("e1").unwrap());
}

#[tokio::test]
async fn test_call_without_trailing_slash() {
    let (app, _) = setup();
    let req = post("/agents/Echo/e1", r#"{"method": "getUrl"}"#);
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["result"], "http://localhost:3800/agents/Echo/e1/");
}

#[tokio::test]
async fn test_rpc_error_is_http_ok() {
    let (app, _) = setup();
    let req = post("/agents/Echo/e1/", r#"{"method": "echo", "params": {"text": 5}}"#);
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["code"], codes::INVALID_PARAMS);
    assert!(json.get("result").is_none());
}

#[tokio::test]
async fn test_trigger_is_not_remotely_callable() {
    let (app, _) = setup();
    let req = post("/agents/Echo/e1/", r#"{"method": "trigger", "params": {"event": "x"}}"#);
    let json = body_json(app.oneshot(req).await.unwrap()).await;
    assert_eq!(json["error"]["code"], codes::ACCESS_DENIED);
}

#[tokio::test]
async fn test_unknown_type() {
    let (app, _) = setup();
    let req = post("/agents/Nope/n1/", r#"{"method": "getId"}"#);
    let json = body_json(app.oneshot(req).await.unwrap()).await;
    assert_eq!(json["error"]["code"], codes::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_json_is_parse_error() {
    let (app, _) = setup();
    let req = post("/agents/Echo/e1/", "{not json");
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["code"], codes::PARSE_ERROR);
}

#[tokio::test]
async fn test_request_without_method_is_invalid() {
    let (app, _) = setup();
    let req = post("/agents/Echo/e1/", r#"{"id": "a", "params": {}}"#);
    let json = body_json(app.oneshot(req).await.unwrap()).await;
    assert_eq!(json["error"]["code"], codes::INVALID_REQUEST);
    assert_eq!(json["id"], "a");
}

// ── Listing & deletion ─────────────────────────────────────────

#[tokio::test]
async fn test_describe_lists_capabilities() {
    let (app, _) = setup();
    let req = Request::get("/agents/Echo/e1/").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let echo = json
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["method"] == "echo")
        .unwrap();
    assert_eq!(echo["params"][0]["type"], "String");
}

#[tokio::test]
async fn test_describe_unknown_type() {
    let (app, _) = setup();
    let req = Request::get("/agents/Nope/n1").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_agent() {
    let (app, host) = setup();
    host.create_agent("Echo", "e1").await.unwrap();

    let req = Request::delete("/agents/Echo/e1/").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!host.states().exists("e1").unwrap());

    let req = Request::delete("/agents/Echo/e1/").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_under_another_type_keeps_agent() {
    let (app, host) = setup();
    host.create_agent("Echo", "e1").await.unwrap();

    let req = Request::delete("/agents/Nope/e1/").body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(host.states().exists("e1").unwrap());

    let req = post("/agents/Echo/e1/", r#"{"method": "echo", "params": {"text": "still here"}}"#);
    let json = body_json(app.oneshot(req).await.unwrap()).await;
    assert_eq!(json["result"], "still here");
}
