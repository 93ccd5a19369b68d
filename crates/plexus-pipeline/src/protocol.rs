//! The protocol layer: endpoint, auth, and transport binding
//!
//! Pure and synchronous. Attaches the side-channel transport record the
//! later layers consume; the record itself is never serialized onto the
//! wire, and the key inside it stays wrapped in `SecretString` so it
//! cannot leak through logs or error messages.

use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use secrecy::SecretString;
use url::Url;

use plexus_core::RequestContext;
use plexus_routing::{ProtocolConfig, ProtocolKind};

/// Transport attributes bound to one attempt
#[derive(Debug, Clone)]
pub struct Transport {
    pub endpoint: Url,
    pub api_key: SecretString,
    pub protocol: ProtocolKind,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Extra headers added by later layers (compat quirks)
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

/// Binds endpoint, auth, timeout, and retry budget to a request
#[derive(Debug)]
pub struct ProtocolLayer {
    config: ProtocolConfig,
}

impl ProtocolLayer {
    pub const fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    /// Produce the transport record for this pipeline
    pub fn bind(&self, api_key: &SecretString, ctx: &mut RequestContext) -> Transport {
        ctx.record_audit(
            "protocol",
            format!(
                "{} via {} (timeout {}ms, {} retries)",
                self.config.kind.as_str(),
                self.config.endpoint,
                self.config.timeout_ms,
                self.config.max_retries,
            ),
        );

        Transport {
            endpoint: self.config.endpoint.clone(),
            api_key: api_key.clone(),
            protocol: self.config.kind,
            timeout: Duration::from_millis(self.config.timeout_ms),
            max_retries: self.config.max_retries,
            headers: Vec::new(),
        }
    }
}
