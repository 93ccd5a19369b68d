use http::StatusCode;
use plexus_core::HttpError;
use plexus_routing::AttemptOutcome;
use thiserror::Error;

/// Failures raised while executing a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A message role the transformer cannot map
    #[error("unsupported message role: {role}")]
    UnsupportedMessageRole { role: String },

    /// A tool definition too broken to repair
    #[error("malformed tool definition: {0}")]
    MalformedToolDefinition(String),

    /// Client body does not fit the dialect it was sent to
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream body was not valid JSON or lacked the expected shape
    #[error("upstream response schema invalid: {0}")]
    ResponseSchemaInvalid(String),

    /// Upstream returned HTTP 429
    #[error("upstream rate limited")]
    Upstream429,

    /// The upstream call exceeded the pipeline timeout
    #[error("upstream timeout")]
    UpstreamTimeout,

    /// Transient upstream failure after exhausting retries
    #[error("upstream transient error: {detail}")]
    UpstreamTransient { status: Option<u16>, detail: String },

    /// Non-retryable upstream failure
    #[error("upstream error {status}: {detail}")]
    UpstreamFatal { status: u16, detail: String },

    /// The request deadline elapsed mid-flight
    #[error("request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The load-balancer outcome this error maps to, if an upstream
    /// attempt was made
    pub const fn outcome(&self) -> Option<AttemptOutcome> {
        match self {
            Self::UnsupportedMessageRole { .. }
            | Self::MalformedToolDefinition(_)
            | Self::InvalidRequest(_) => None,
            Self::ResponseSchemaInvalid(_) | Self::UpstreamFatal { .. } => {
                Some(AttemptOutcome::Fatal)
            }
            Self::Upstream429 => Some(AttemptOutcome::RateLimited),
            Self::UpstreamTimeout => Some(AttemptOutcome::Timeout),
            Self::UpstreamTransient { .. } | Self::Cancelled => Some(AttemptOutcome::Transient),
        }
    }
}

impl HttpError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMessageRole { .. }
            | Self::MalformedToolDefinition(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ResponseSchemaInvalid(_)
            | Self::Upstream429
            | Self::UpstreamTransient { .. }
            | Self::UpstreamFatal { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout | Self::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::UnsupportedMessageRole { .. } => "unsupported_message_role",
            Self::MalformedToolDefinition(_) => "malformed_tool_definition",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::ResponseSchemaInvalid(_) => "response_schema_invalid",
            Self::Upstream429 => "upstream_rate_limited",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamTransient { .. } => "upstream_transient_error",
            Self::UpstreamFatal { .. } => "upstream_error",
            Self::Cancelled => "request_timeout",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}
