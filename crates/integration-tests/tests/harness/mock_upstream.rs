//! Mock upstream backend for integration tests
//!
//! Serves a minimal OpenAI-compatible chat-completions endpoint with
//! canned responses, scriptable failures, and request capture so tests
//! can assert on exactly what the router sent.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Scriptable mock backend
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    completion_count: AtomicU32,
    /// Statuses to return, one per request, before succeeding
    fail_queue: std::sync::Mutex<VecDeque<u16>>,
    /// Status to return on every request (overrides the queue)
    always_status: Option<u16>,
    /// Return HTTP 200 with a body missing `choices`
    malformed: bool,
    /// Hold each response this long
    delay: Option<Duration>,
    response_content: String,
    last_body: std::sync::Mutex<Option<Value>>,
}

#[derive(Default)]
pub struct MockOptions {
    pub fail_queue: Vec<u16>,
    pub always_status: Option<u16>,
    pub malformed: bool,
    pub delay: Option<Duration>,
    pub response_content: Option<String>,
}

impl MockUpstream {
    /// Healthy mock returning a canned response
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(MockOptions::default()).await
    }

    /// Mock with a custom response body text
    pub async fn start_with_response(content: &str) -> anyhow::Result<Self> {
        Self::start_with(MockOptions {
            response_content: Some(content.to_owned()),
            ..MockOptions::default()
        })
        .await
    }

    /// Mock failing the first requests with the given statuses
    pub async fn start_failing_with(statuses: &[u16]) -> anyhow::Result<Self> {
        Self::start_with(MockOptions {
            fail_queue: statuses.to_vec(),
            ..MockOptions::default()
        })
        .await
    }

    /// Mock returning the same status on every request
    pub async fn start_always(status: u16) -> anyhow::Result<Self> {
        Self::start_with(MockOptions {
            always_status: Some(status),
            ..MockOptions::default()
        })
        .await
    }

    /// Mock returning 200 with a schema-invalid body
    pub async fn start_malformed() -> anyhow::Result<Self> {
        Self::start_with(MockOptions {
            malformed: true,
            ..MockOptions::default()
        })
        .await
    }

    /// Mock that sleeps before answering
    pub async fn start_with_delay(delay: Duration) -> anyhow::Result<Self> {
        Self::start_with(MockOptions {
            delay: Some(delay),
            ..MockOptions::default()
        })
        .await
    }

    pub async fn start_with(options: MockOptions) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            completion_count: AtomicU32::new(0),
            fail_queue: std::sync::Mutex::new(options.fail_queue.into_iter().collect()),
            always_status: options.always_status,
            malformed: options.malformed,
            delay: options.delay,
            response_content: options
                .response_content
                .unwrap_or_else(|| "Hello from mock upstream".to_owned()),
            last_body: std::sync::Mutex::new(None),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    /// Base URL for the provider config; the router appends the path
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Number of completion requests received
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    /// The most recent request body the router sent
    pub fn last_body(&self) -> Option<Value> {
        self.state.last_body.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_completions(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.completion_count.fetch_add(1, Ordering::Relaxed);
    *state.last_body.lock().unwrap() = Some(body.clone());

    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }

    if let Some(status) = state.always_status {
        return error_response(status);
    }

    if let Some(status) = state.fail_queue.lock().unwrap().pop_front() {
        return error_response(status);
    }

    if state.malformed {
        return (StatusCode::OK, Json(json!({"unexpected": true}))).into_response();
    }

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("mock-model");

    let response = json!({
        "id": "chatcmpl-mock-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": state.response_content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    });

    Json(response).into_response()
}

fn error_response(status: u16) -> axum::response::Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({
            "error": {"message": "mock upstream scripted failure", "type": "mock_error"}
        })),
    )
        .into_response()
}
