//! The pipeline registry: instance ownership and lifecycle
//!
//! Owns one pre-wired [`PipelineInstance`] per pipeline configuration.
//! Instances are created exactly once per assembly and torn down on
//! shutdown or when a reload replaces the whole registry; nothing else
//! constructs or discovers pipelines at request time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use plexus_core::RequestContext;
use plexus_routing::{PipelineConfig, RoutingTable};

use crate::chain::{ChainOutcome, LayerChain};
use crate::inbound::InboundRequest;

/// Lifecycle of one pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Runtime,
    Error,
    Stopped,
}

impl LifecycleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Runtime,
            2 => Self::Error,
            _ => Self::Stopped,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Runtime => 1,
            Self::Error => 2,
            Self::Stopped => 3,
        }
    }
}

/// One constructed pipeline: configuration plus its wired layer chain
#[derive(Debug)]
pub struct PipelineInstance {
    config: PipelineConfig,
    chain: LayerChain,
    state: AtomicU8,
}

impl PipelineInstance {
    fn new(config: PipelineConfig, client: reqwest::Client) -> Self {
        let chain = LayerChain::from_config(&config, client);
        Self {
            config,
            chain,
            state: AtomicU8::new(LifecycleState::Runtime.as_u8()),
        }
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    /// Run one request through this pipeline's chain
    pub async fn execute(
        &self,
        inbound: &InboundRequest,
        ctx: &mut RequestContext,
    ) -> ChainOutcome {
        self.chain.execute(inbound, ctx).await
    }
}

/// Owns every pipeline instance for one table snapshot
#[derive(Debug)]
pub struct PipelineRegistry {
    instances: HashMap<String, Arc<PipelineInstance>>,
}

impl PipelineRegistry {
    /// Construct all instances for an assembled table
    ///
    /// One shared HTTP client backs every server layer; connection
    /// pooling happens there.
    pub fn build(table: &RoutingTable) -> Self {
        let client = reqwest::Client::new();

        let instances = table
            .pipelines()
            .iter()
            .map(|config| {
                (
                    config.id.clone(),
                    Arc::new(PipelineInstance::new(config.clone(), client.clone())),
                )
            })
            .collect();

        Self { instances }
    }

    /// Look up an instance by pipeline id
    pub fn instance(&self, id: &str) -> Option<Arc<PipelineInstance>> {
        self.instances.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Mark every instance stopped; in-flight requests finish on their
    /// own `Arc` handles
    pub fn shutdown(&self) {
        for instance in self.instances.values() {
            instance.set_state(LifecycleState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use plexus_config::{SystemConfig, UserConfig};
    use plexus_routing::assemble;

    use super::*;

    fn sample_table() -> RoutingTable {
        let user: UserConfig = toml::from_str(
            r#"
            [[providers]]
            name = "lmstudio"
            api_base_url = "http://localhost:1234/v1"
            api_key = ["k0", "k1"]
            models = ["gpt-oss-20b"]

            [router]
            default = "lmstudio,gpt-oss-20b"
            "#,
        )
        .unwrap();
        assemble(&user, &SystemConfig::builtin()).unwrap()
    }

    #[test]
    fn builds_one_instance_per_pipeline() {
        let table = sample_table();
        let registry = PipelineRegistry::build(&table);

        assert_eq!(registry.len(), 2);
        let instance = registry.instance("lmstudio-gpt-oss-20b-key0").unwrap();
        assert_eq!(instance.state(), LifecycleState::Runtime);
        assert_eq!(instance.config().key_index, 0);
        assert!(registry.instance("nope").is_none());
    }

    #[test]
    fn shutdown_stops_every_instance() {
        let registry = PipelineRegistry::build(&sample_table());
        registry.shutdown();

        for id in ["lmstudio-gpt-oss-20b-key0", "lmstudio-gpt-oss-20b-key1"] {
            assert_eq!(
                registry.instance(id).unwrap().state(),
                LifecycleState::Stopped
            );
        }
    }
}
