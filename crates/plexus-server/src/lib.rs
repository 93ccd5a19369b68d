//! HTTP surface for the Plexus router
//!
//! Serves the Anthropic Messages dialect on `/v1/messages` and the
//! OpenAI chat-completions dialect on `/v1/chat/completions`, plus a
//! liveness probe, an informational pipeline view, and an optional
//! reload endpoint. Domain errors map to HTTP through
//! [`plexus_core::HttpError`]; bodies carry `{type, message, code}`.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod state;

use std::time::Duration;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use http::StatusCode;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use plexus_config::UserConfig;
use plexus_core::{HttpError, RequestContext, RequestPriority};
use plexus_pipeline::InboundRequest;
use plexus_pipeline::wire::anthropic::AnthropicRequest;

pub use state::{Gateway, GatewayError, GatewayOptions};

/// Header carrying the optional scheduling priority (high|normal|low)
const PRIORITY_HEADER: &str = "x-request-priority";

/// Build the axum router over a constructed gateway
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/v1/messages", routing::post(anthropic_messages))
        .route("/v1/chat/completions", routing::post(openai_chat_completions))
        .route("/v1/pipelines", routing::get(pipelines_view))
        .route("/v1/admin/reload", routing::post(reload))
        .route("/healthz", routing::get(healthz))
        .with_state(gateway)
}

/// Serve until the shutdown token fires
pub async fn serve(
    gateway: Gateway,
    listener: tokio::net::TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// Handle `POST /v1/messages` (Anthropic dialect)
async fn anthropic_messages(
    State(gateway): State<Gateway>,
    headers: http::HeaderMap,
    Json(request): Json<AnthropicRequest>,
) -> Response {
    run(&gateway, InboundRequest::Anthropic(request), &headers).await
}

/// Handle `POST /v1/chat/completions` (OpenAI dialect)
///
/// The body stays raw JSON so passthrough pipelines forward it intact.
async fn openai_chat_completions(
    State(gateway): State<Gateway>,
    headers: http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    run(&gateway, InboundRequest::OpenAi(body), &headers).await
}

/// Drive one request through the gateway under the request deadline
async fn run(gateway: &Gateway, inbound: InboundRequest, headers: &http::HeaderMap) -> Response {
    let priority = headers
        .get(PRIORITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or(RequestPriority::Normal, RequestPriority::parse);

    let cancel = CancellationToken::new();
    let mut ctx = RequestContext::new(priority, cancel.clone());
    let deadline = Duration::from_millis(gateway.settings().request_timeout_ms);

    if inbound.stream_requested() {
        // Streaming degrades cleanly: the chain executes buffered and
        // the client receives a complete JSON body
        tracing::debug!(request_id = %ctx.request_id, "stream requested, degrading to buffered");
    }

    let outcome = tokio::time::timeout(deadline, gateway.handle(&inbound, &mut ctx)).await;

    match outcome {
        Ok(Ok(body)) => {
            log_completed(&ctx, StatusCode::OK);
            Json(body).into_response()
        }
        Ok(Err(error)) => {
            let status = error.status_code();
            log_completed(&ctx, status);
            error_response(status, error.error_type(), &error.client_message())
        }
        Err(_elapsed) => {
            // Deadline hit; cancel propagates to any in-flight upstream call
            cancel.cancel();
            log_completed(&ctx, StatusCode::GATEWAY_TIMEOUT);
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "request_timeout",
                "request deadline exceeded",
            )
        }
    }
}

fn log_completed(ctx: &RequestContext, status: StatusCode) {
    tracing::info!(
        request_id = %ctx.request_id,
        category = ctx.category.map(|c| c.as_str()).unwrap_or("-"),
        pipeline = ctx.pipeline_id.as_deref().unwrap_or("-"),
        status = status.as_u16(),
        elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
        "request completed"
    );
}

/// `{type, message, code}` error body shared by both dialects
fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    let body = json!({
        "type": error_type,
        "message": message,
        "code": status.as_u16(),
    });
    (status, Json(body)).into_response()
}

/// Handle `GET /healthz`
async fn healthz() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

/// Handle `GET /v1/pipelines` — informational only
async fn pipelines_view(State(gateway): State<Gateway>) -> Response {
    Json(gateway.pipelines_view()).into_response()
}

/// Handle `POST /v1/admin/reload`
///
/// Re-reads the user config from its original path and swaps the table.
/// Returns 409 when the gateway was built without a config path, 422
/// with the full issue list when validation fails.
async fn reload(State(gateway): State<Gateway>) -> Response {
    let Some(path) = gateway.config_path().cloned() else {
        return error_response(
            StatusCode::CONFLICT,
            "reload_unavailable",
            "gateway was started without a config path",
        );
    };

    let user = match UserConfig::load(&path) {
        Ok(user) => user,
        Err(error) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "config_load_error",
                &error.to_string(),
            );
        }
    };

    match gateway.reload(&user).await {
        Ok(pipelines) => Json(json!({"status": "reloaded", "pipelines": pipelines})).into_response(),
        Err(error) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "config_error",
            &error.to_string(),
        ),
    }
}
