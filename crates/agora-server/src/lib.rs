//! # agora-server
//!
//! HTTP ingress for an [`AgentHost`]. Every agent is a JSON-RPC endpoint:
//!
//! - `POST /agents/{type}/{id}/` calls a capability, creating the agent on
//!   first use. RPC failures are answered with HTTP 200 and an error object.
//! - `GET /agents/{type}/{id}/` lists the capabilities of the type
//! - `DELETE /agents/{type}/{id}/` deregisters the agent if it is of that type
//! - `GET /health` and `GET /metrics`

pub mod metrics;

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use agora_config::LoggingConfig;
use agora_core::{AgoraError, Result, RpcError, RpcRequest, RpcResponse, codes};
use agora_runtime::{AgentHost, Origin};

/// Shared server state.
pub struct AppState {
    pub host: Arc<AgentHost>,
    pub metrics: metrics::Metrics,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

/// Build the Axum router.
pub fn build_router(host: Arc<AgentHost>) -> Router {
    let state = Arc::new(AppState {
        host,
        metrics: metrics::Metrics::new(),
    });

    let agent_routes = get(describe_handler)
        .post(call_handler)
        .delete(delete_handler);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/agents/{agent_type}/{agent_id}", agent_routes.clone())
        .route("/agents/{agent_type}/{agent_id}/", agent_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    state.metrics.inc_http_requests();
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: state.metrics.uptime_secs(),
    })
}

/// Prometheus-compatible metrics endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.metrics.render_prometheus(state.host.scheduler().len());
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

fn parse_failure(code: i64, message: String, id: Option<Value>) -> RpcResponse {
    RpcResponse::err(RpcError {
        code,
        message,
        data: None,
    })
    .with_id(id)
}

/// Decode a request body. Invalid JSON is a parse error; valid JSON that is
/// not a request is an invalid request, echoing its `id` when present.
fn parse_request(body: &[u8]) -> std::result::Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        parse_failure(codes::PARSE_ERROR, format!("parse error: {}", e), None)
    })?;
    let id = value.get("id").cloned();
    serde_json::from_value(value).map_err(|e| {
        parse_failure(codes::INVALID_REQUEST, format!("invalid request: {}", e), id)
    })
}

async fn call_handler(
    State(state): State<Arc<AppState>>,
    Path((agent_type, agent_id)): Path<(String, String)>,
    body: Bytes,
) -> Json<RpcResponse> {
    state.metrics.inc_http_requests();
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(response) => {
            debug!(agent_type = %agent_type, agent_id = %agent_id, "rejected malformed request");
            state.metrics.inc_parse_errors();
            state.metrics.inc_rpc_errors();
            return Json(response);
        }
    };

    state.metrics.inc_rpc_requests();
    let method = request.method.clone();
    let response = state
        .host
        .dispatch_to(&agent_type, &agent_id, request, Origin::Remote)
        .await;
    if let Some(error) = &response.error {
        state.metrics.inc_rpc_errors();
        debug!(
            agent_type = %agent_type,
            agent_id = %agent_id,
            method = %method,
            code = error.code,
            "call answered with error"
        );
    }
    Json(response)
}

fn error_response(status: StatusCode, error: &AgoraError) -> Response {
    (status, Json(RpcResponse::err(error.to_rpc_error()))).into_response()
}

/// Structured capability listing of the agent's type.
async fn describe_handler(
    State(state): State<Arc<AppState>>,
    Path((agent_type, _agent_id)): Path<(String, String)>,
) -> Response {
    state.metrics.inc_http_requests();
    match state.host.capabilities(&agent_type) {
        Some(registry) => Json(Value::Array(registry.list(true))).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &AgoraError::NotFound(format!("agent type '{}'", agent_type)),
        ),
    }
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path((agent_type, agent_id)): Path<(String, String)>,
) -> Response {
    state.metrics.inc_http_requests();
    match state.host.delete_agent_of(&agent_type, &agent_id).await {
        Ok(true) => {
            state.metrics.inc_agents_deleted();
            info!(agent_type = %agent_type, agent_id = %agent_id, "agent deregistered over HTTP");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &AgoraError::NotFound(format!("agent '{}/{}'", agent_type, agent_id)),
        ),
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "failed to delete agent");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

/// Bind `listen` and serve the host until the process exits.
pub async fn serve(host: Arc<AgentHost>, listen: &str) -> Result<()> {
    let router = build_router(host);
    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| AgoraError::Config(format!("failed to bind {}: {}", listen, e)))?;

    axum::serve(listener, router).await?;
    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format.as_str() {
        "json" => builder.json().with_target(true).try_init(),
        "compact" => builder.compact().with_target(false).try_init(),
        _ => builder.pretty().with_target(false).try_init(),
    };
    installed.map_err(|e| AgoraError::Config(format!("failed to install tracing subscriber: {}", e)))
}
