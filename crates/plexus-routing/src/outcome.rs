/// Classified result of one upstream attempt
///
/// Produced by the server layer, consumed by the load balancer and key
/// pool to drive cooldowns and blacklisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Upstream returned a valid response
    Ok,
    /// Upstream returned HTTP 429
    RateLimited,
    /// The attempt timed out or was cancelled
    Timeout,
    /// Transient failure (5xx, connection error)
    Transient,
    /// Non-retryable failure (other 4xx, schema violation)
    Fatal,
}

impl AttemptOutcome {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Transient => "transient_error",
            Self::Fatal => "fatal_error",
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
