use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::Category;

/// Scheduling priority a client may attach to a request
///
/// Affects load-balancer scoring only; it never changes which pipelines
/// are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPriority {
    /// Prefer high-weight slots
    High,
    /// No adjustment
    #[default]
    Normal,
    /// Tolerate backup slots
    Low,
}

impl RequestPriority {
    /// Parse a priority header value; unknown values fall back to normal
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }
}

/// Per-request state threaded through classification, selection, and the
/// layer chain
///
/// Single-owner: created by the handler, mutated in place, dropped when
/// the response is written. Never shared across requests.
#[derive(Debug)]
pub struct RequestContext {
    /// Unique id for log correlation
    pub request_id: String,
    /// Receipt time
    pub started_at: Instant,
    /// Category assigned by the classifier
    pub category: Option<Category>,
    /// Pipeline chosen by the load balancer
    pub pipeline_id: Option<String>,
    /// Scheduling priority
    pub priority: RequestPriority,
    /// Wall time spent in each layer, in execution order
    pub layer_timings: Vec<(&'static str, Duration)>,
    /// Append-only summaries of what each layer changed
    pub audit: Vec<(&'static str, String)>,
    /// Append-only error descriptions accumulated along the way
    pub errors: Vec<String>,
    /// Deadline token; cancelled when the request timeout elapses
    pub cancel: CancellationToken,
}

impl RequestContext {
    /// Create a fresh context with a random request id
    pub fn new(priority: RequestPriority, cancel: CancellationToken) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            category: None,
            pipeline_id: None,
            priority,
            layer_timings: Vec::new(),
            audit: Vec::new(),
            errors: Vec::new(),
            cancel,
        }
    }

    /// Record how long a layer took
    pub fn record_timing(&mut self, layer: &'static str, elapsed: Duration) {
        self.layer_timings.push((layer, elapsed));
    }

    /// Record a one-line summary of a layer's transformation
    pub fn record_audit(&mut self, layer: &'static str, summary: impl Into<String>) {
        self.audit.push((layer, summary.into()));
    }

    /// Record an error encountered while processing
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}
