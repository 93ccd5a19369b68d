//! The server layer: the one outbound HTTP call
//!
//! The only layer that suspends. Executes a POST against the corrected
//! endpoint with the pipeline's timeout, retries timeouts and transient
//! 5xx within the retry budget, and classifies every terminal state
//! into an [`AttemptOutcome`] for the load balancer. 429 and other 4xx
//! are never retried. Cancellation aborts the in-flight call and
//! surfaces as a transient outcome so the key slot is released cleanly.

use std::time::Duration;

use http::header::USER_AGENT;
use secrecy::ExposeSecret;
use serde_json::Value;

use plexus_core::RequestContext;
use plexus_routing::{AttemptOutcome, ProtocolKind};

use crate::error::PipelineError;
use crate::protocol::Transport;

/// Retry backoff cap
const MAX_BACKOFF: Duration = Duration::from_millis(5000);

/// Base retry backoff; doubles per attempt up to the cap
const BASE_BACKOFF_MS: u64 = 1000;

const PLEXUS_USER_AGENT: &str = concat!("plexus/", env!("CARGO_PKG_VERSION"));

/// Executes upstream calls for one pipeline
#[derive(Debug, Clone)]
pub struct ServerLayer {
    client: reqwest::Client,
}

impl ServerLayer {
    /// Wrap a shared HTTP client
    ///
    /// Per-attempt timeouts come from the transport record, so the
    /// client itself carries no global timeout.
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Execute the call, retrying per policy, and classify the outcome
    pub async fn execute(
        &self,
        body: &Value,
        transport: &Transport,
        ctx: &mut RequestContext,
    ) -> (AttemptOutcome, Result<Value, PipelineError>) {
        let mut attempt: u32 = 0;

        loop {
            let (outcome, result) = self.attempt(body, transport, ctx).await;

            let retryable = matches!(
                outcome,
                AttemptOutcome::Timeout | AttemptOutcome::Transient
            ) && !matches!(result, Err(PipelineError::Cancelled));

            if !retryable || attempt >= transport.max_retries {
                return (outcome, result);
            }

            let backoff = Duration::from_millis(
                (BASE_BACKOFF_MS << attempt.min(8)).min(MAX_BACKOFF.as_millis() as u64),
            );
            tracing::debug!(
                request_id = %ctx.request_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "retrying upstream call"
            );

            tokio::select! {
                () = ctx.cancel.cancelled() => {
                    return (AttemptOutcome::Transient, Err(PipelineError::Cancelled));
                }
                () = tokio::time::sleep(backoff) => {}
            }

            attempt += 1;
        }
    }

    /// One HTTP attempt, classified
    async fn attempt(
        &self,
        body: &Value,
        transport: &Transport,
        ctx: &mut RequestContext,
    ) -> (AttemptOutcome, Result<Value, PipelineError>) {
        let mut request = self
            .client
            .post(transport.endpoint.clone())
            .timeout(transport.timeout)
            .header(USER_AGENT, PLEXUS_USER_AGENT)
            .json(body);

        request = match transport.protocol {
            ProtocolKind::OpenAi => request.bearer_auth(transport.api_key.expose_secret()),
            ProtocolKind::Anthropic => {
                request.header("x-api-key", transport.api_key.expose_secret())
            }
        };

        for (name, value) in &transport.headers {
            request = request.header(name.clone(), value.clone());
        }

        let response = tokio::select! {
            () = ctx.cancel.cancelled() => {
                // Dropping the future aborts the socket read
                return (AttemptOutcome::Transient, Err(PipelineError::Cancelled));
            }
            result = request.send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                ctx.record_error("upstream timeout");
                return (AttemptOutcome::Timeout, Err(PipelineError::UpstreamTimeout));
            }
            Err(error) => {
                ctx.record_error(format!("upstream connection error: {error}"));
                return (
                    AttemptOutcome::Transient,
                    Err(PipelineError::UpstreamTransient {
                        status: None,
                        detail: error.to_string(),
                    }),
                );
            }
        };

        let status = response.status();

        if status.as_u16() == 429 {
            // Exactly one outbound call; never retried here
            ctx.record_error("upstream rate limited");
            return (AttemptOutcome::RateLimited, Err(PipelineError::Upstream429));
        }

        if status.is_server_error() {
            let detail = truncated_body(response).await;
            ctx.record_error(format!("upstream {status}"));
            return (
                AttemptOutcome::Transient,
                Err(PipelineError::UpstreamTransient {
                    status: Some(status.as_u16()),
                    detail,
                }),
            );
        }

        if status.is_client_error() {
            let detail = truncated_body(response).await;
            ctx.record_error(format!("upstream {status}"));
            return (
                AttemptOutcome::Fatal,
                Err(PipelineError::UpstreamFatal {
                    status: status.as_u16(),
                    detail,
                }),
            );
        }

        let parsed: Value = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                return (
                    AttemptOutcome::Fatal,
                    Err(PipelineError::ResponseSchemaInvalid(format!(
                        "body is not valid JSON: {error}"
                    ))),
                );
            }
        };

        if !has_expected_shape(&parsed, transport.protocol) {
            return (
                AttemptOutcome::Fatal,
                Err(PipelineError::ResponseSchemaInvalid(format!(
                    "missing {} array",
                    expected_field(transport.protocol),
                ))),
            );
        }

        (AttemptOutcome::Ok, Ok(parsed))
    }
}

/// Whether the body carries the array the dialect requires
fn has_expected_shape(body: &Value, protocol: ProtocolKind) -> bool {
    body.get(expected_field(protocol)).is_some_and(Value::is_array)
}

const fn expected_field(protocol: ProtocolKind) -> &'static str {
    match protocol {
        ProtocolKind::OpenAi => "choices",
        ProtocolKind::Anthropic => "content",
    }
}

/// First kilobyte of an error body, for diagnostics
async fn truncated_body(response: reqwest::Response) -> String {
    let mut text = response.text().await.unwrap_or_default();
    truncate_at_char_boundary(&mut text, 1024);
    text
}

/// Truncate to at most `max` bytes without splitting a codepoint
fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_shape_requires_choices() {
        assert!(has_expected_shape(
            &serde_json::json!({"choices": []}),
            ProtocolKind::OpenAi
        ));
        assert!(!has_expected_shape(
            &serde_json::json!({"unexpected": true}),
            ProtocolKind::OpenAi
        ));
        assert!(!has_expected_shape(
            &serde_json::json!({"choices": "nope"}),
            ProtocolKind::OpenAi
        ));
    }

    #[test]
    fn anthropic_shape_requires_content() {
        assert!(has_expected_shape(
            &serde_json::json!({"content": []}),
            ProtocolKind::Anthropic
        ));
        assert!(!has_expected_shape(
            &serde_json::json!({"choices": []}),
            ProtocolKind::Anthropic
        ));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 4-byte codepoints; byte 10 falls mid-codepoint
        let mut text = "🦀".repeat(5);
        truncate_at_char_boundary(&mut text, 10);
        assert_eq!(text, "🦀🦀");

        let mut short = "short".to_owned();
        truncate_at_char_boundary(&mut short, 10);
        assert_eq!(short, "short");

        let mut ascii = "a".repeat(20);
        truncate_at_char_boundary(&mut ascii, 10);
        assert_eq!(ascii.len(), 10);
    }
}
