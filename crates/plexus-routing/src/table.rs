//! The immutable routing table and its pipeline configurations
//!
//! Built once per assembly, shared read-only by every request handler.
//! A live reload swaps the whole table atomically; in-flight requests
//! finish against the snapshot they started with.

use std::collections::{BTreeMap, HashMap};

use plexus_core::Category;
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;

use crate::tags::{CompatTag, ProtocolKind, TransformerKind};

/// Transformer-layer parameters for one pipeline
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    pub provider: String,
    pub target_model: String,
    pub kind: TransformerKind,
}

/// Protocol-layer parameters for one pipeline
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub provider: String,
    pub target_model: String,
    pub endpoint: Url,
    pub kind: ProtocolKind,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

/// Server-compatibility-layer parameters for one pipeline
#[derive(Debug, Clone)]
pub struct CompatConfig {
    pub tag: CompatTag,
    /// Path appended to the endpoint when absent
    pub endpoint_suffix: String,
    pub max_tokens: u32,
    /// Per-tag options forwarded verbatim from the provider config
    pub options: Value,
}

/// Server-layer parameters for one pipeline
#[derive(Debug, Clone)]
pub struct HttpCallConfig {
    pub endpoint: Url,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
}

/// One parameter record per layer, resolved at assembly
#[derive(Debug, Clone)]
pub struct LayerConfigs {
    pub transformer: TransformerConfig,
    pub protocol: ProtocolConfig,
    pub compat: CompatConfig,
    pub server: HttpCallConfig,
}

/// A fully-resolved pipeline: provider + target model + API-key slot
///
/// Immutable after assembly. `id` has the form `<provider>-<model>-key<i>`
/// and is unique across the table.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub id: String,
    pub provider: String,
    pub target_model: String,
    pub endpoint: Url,
    pub key_index: usize,
    pub api_key: SecretString,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub weight: u32,
    pub max_concurrent: u32,
    /// Categories whose lists reference this pipeline
    pub categories: Vec<Category>,
    pub layers: LayerConfigs,
}

/// Immutable category → pipeline mapping plus the flat pipeline list
#[derive(Debug)]
pub struct RoutingTable {
    categories: BTreeMap<Category, Vec<String>>,
    pipelines: Vec<PipelineConfig>,
    index: HashMap<String, usize>,
}

impl RoutingTable {
    pub(crate) fn new(
        categories: BTreeMap<Category, Vec<String>>,
        pipelines: Vec<PipelineConfig>,
    ) -> Self {
        let index = pipelines
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self {
            categories,
            pipelines,
            index,
        }
    }

    /// In-order candidate pipeline ids for a category
    pub fn candidates(&self, category: Category) -> &[String] {
        self.categories.get(&category).map_or(&[], Vec::as_slice)
    }

    /// Whether a category has at least one pipeline
    pub fn has_pipelines(&self, category: Category) -> bool {
        !self.candidates(category).is_empty()
    }

    /// All pipeline ids in emission order — the cross-category rescue pool
    pub fn global_pool(&self) -> impl Iterator<Item = &str> {
        self.pipelines.iter().map(|p| p.id.as_str())
    }

    /// Look up a pipeline configuration by id
    pub fn pipeline(&self, id: &str) -> Option<&PipelineConfig> {
        self.index.get(id).map(|&i| &self.pipelines[i])
    }

    /// The flat pipeline list, in emission order
    pub fn pipelines(&self) -> &[PipelineConfig] {
        &self.pipelines
    }

    /// Categories present in the table, with their candidate lists
    pub fn categories(&self) -> impl Iterator<Item = (Category, &[String])> {
        self.categories.iter().map(|(c, ids)| (*c, ids.as_slice()))
    }

    /// Deterministic JSON rendering of the table, without secrets
    ///
    /// Two assemblies of the same configuration produce byte-identical
    /// output here; used by tests and the diagnostics endpoint.
    pub fn to_canonical_json(&self) -> Value {
        let categories: BTreeMap<&str, &Vec<String>> = self
            .categories
            .iter()
            .map(|(c, ids)| (c.as_str(), ids))
            .collect();

        let pipelines: Vec<Value> = self
            .pipelines
            .iter()
            .map(|p| {
                json!({
                    "id": p.id,
                    "provider": p.provider,
                    "targetModel": p.target_model,
                    "endpoint": p.endpoint.as_str(),
                    "keyIndex": p.key_index,
                    "maxTokens": p.max_tokens,
                    "timeoutMs": p.timeout_ms,
                    "maxRetries": p.max_retries,
                    "weight": p.weight,
                    "categories": p.categories,
                    "transformer": p.layers.transformer.kind.as_str(),
                    "protocol": p.layers.protocol.kind.as_str(),
                    "serverCompatibility": p.layers.compat.tag.as_str(),
                })
            })
            .collect();

        json!({
            "categories": categories,
            "pipelines": pipelines,
        })
    }
}
