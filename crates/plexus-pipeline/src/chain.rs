//! The per-request layer chain
//!
//! Runs the four layers strictly in order for one request, recording
//! per-layer wall time in the request context. The chain never re-picks
//! a pipeline on failure; that policy belongs to the caller.

use std::time::{Duration, Instant};

use serde_json::Value;

use plexus_core::RequestContext;
use plexus_routing::{AttemptOutcome, PipelineConfig};

use crate::compat::CompatLayer;
use crate::error::PipelineError;
use crate::inbound::InboundRequest;
use crate::protocol::ProtocolLayer;
use crate::server::ServerLayer;
use crate::transform::TransformerLayer;

/// Result of one chain execution
#[derive(Debug)]
pub struct ChainOutcome {
    /// Upstream outcome for the load balancer; `None` when the request
    /// failed before any outbound attempt
    pub upstream: Option<AttemptOutcome>,
    /// The translated response, or the failure
    pub result: Result<Value, PipelineError>,
    /// Wall time spent in the chain
    pub elapsed: Duration,
}

/// The four pre-wired layers of one pipeline
#[derive(Debug)]
pub struct LayerChain {
    transformer: TransformerLayer,
    protocol: ProtocolLayer,
    compat: CompatLayer,
    server: ServerLayer,
    api_key: secrecy::SecretString,
}

impl LayerChain {
    /// Wire the chain from an assembled pipeline configuration
    pub fn from_config(config: &PipelineConfig, client: reqwest::Client) -> Self {
        Self {
            transformer: TransformerLayer::new(config.layers.transformer.clone()),
            protocol: ProtocolLayer::new(config.layers.protocol.clone()),
            compat: CompatLayer::new(config.layers.compat.clone()),
            server: ServerLayer::new(client),
            api_key: config.api_key.clone(),
        }
    }

    /// Execute transformer → protocol → compat → server → response
    /// translation for one request
    pub async fn execute(
        &self,
        inbound: &InboundRequest,
        ctx: &mut RequestContext,
    ) -> ChainOutcome {
        let started = Instant::now();

        // Transformer: client dialect -> backend dialect
        let step = Instant::now();
        let mut body = match self.transformer.request(inbound, ctx) {
            Ok(body) => body,
            Err(error) => {
                ctx.record_error(error.to_string());
                return ChainOutcome {
                    upstream: None,
                    result: Err(error),
                    elapsed: started.elapsed(),
                };
            }
        };
        ctx.record_timing("transformer", step.elapsed());

        // Protocol: bind endpoint, auth, timeout, retry budget
        let step = Instant::now();
        let mut transport = self.protocol.bind(&self.api_key, ctx);
        ctx.record_timing("protocol", step.elapsed());

        // Server compatibility: per-backend quirks
        let step = Instant::now();
        self.compat.prepare(&mut body, &mut transport, ctx);
        ctx.record_timing("compat", step.elapsed());

        // Server: the one outbound HTTP call
        let step = Instant::now();
        let (outcome, upstream_result) = self.server.execute(&body, &transport, ctx).await;
        ctx.record_timing("server", step.elapsed());

        let result = match upstream_result {
            Ok(upstream_body) => {
                // Response direction: backend dialect -> client dialect
                match self.transformer.response(inbound, upstream_body, ctx) {
                    Ok(translated) => {
                        return ChainOutcome {
                            upstream: Some(AttemptOutcome::Ok),
                            result: Ok(translated),
                            elapsed: started.elapsed(),
                        };
                    }
                    Err(error) => {
                        // A response we cannot translate counts as fatal
                        ctx.record_error(error.to_string());
                        return ChainOutcome {
                            upstream: Some(AttemptOutcome::Fatal),
                            result: Err(error),
                            elapsed: started.elapsed(),
                        };
                    }
                }
            }
            Err(error) => {
                ctx.record_error(error.to_string());
                Err(error)
            }
        };

        ChainOutcome {
            upstream: Some(outcome),
            result,
            elapsed: started.elapsed(),
        }
    }
}
