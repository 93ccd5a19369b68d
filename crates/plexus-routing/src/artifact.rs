//! Pipeline-table artifact for on-disk diagnostics
//!
//! A JSON document describing every assembled pipeline, written after
//! each assembly. Informational only: the in-memory routing table is
//! authoritative and the artifact is never read back by the router.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::table::{PipelineConfig, RoutingTable};

/// Serialized pipeline-table document
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTableArtifact {
    pub config_name: String,
    pub generated_at: String,
    pub total_pipelines: usize,
    pub pipelines_grouped_by_virtual_model: BTreeMap<String, Vec<PipelineSummary>>,
    pub all_pipelines: Vec<PipelineSummary>,
}

/// One pipeline's descriptive row
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub id: String,
    pub provider: String,
    pub target_model: String,
    pub endpoint: String,
    pub key_index: usize,
    pub max_tokens: u32,
    /// Layer chain in execution order
    pub architecture: String,
}

impl PipelineSummary {
    fn from_config(config: &PipelineConfig) -> Self {
        Self {
            id: config.id.clone(),
            provider: config.provider.clone(),
            target_model: config.target_model.clone(),
            endpoint: config.endpoint.to_string(),
            key_index: config.key_index,
            max_tokens: config.max_tokens,
            architecture: format!(
                "transformer:{} -> protocol:{} -> compat:{} -> server:http",
                config.layers.transformer.kind.as_str(),
                config.layers.protocol.kind.as_str(),
                config.layers.compat.tag.as_str(),
            ),
        }
    }
}

impl PipelineTableArtifact {
    /// Build the artifact from an assembled table
    pub fn from_table(config_name: impl Into<String>, table: &RoutingTable) -> Self {
        let all_pipelines: Vec<PipelineSummary> = table
            .pipelines()
            .iter()
            .map(PipelineSummary::from_config)
            .collect();

        let mut grouped: BTreeMap<String, Vec<PipelineSummary>> = BTreeMap::new();
        for (category, ids) in table.categories() {
            let rows = ids
                .iter()
                .filter_map(|id| table.pipeline(id))
                .map(PipelineSummary::from_config)
                .collect();
            grouped.insert(category.as_str().to_owned(), rows);
        }

        Self {
            config_name: config_name.into(),
            generated_at: jiff::Timestamp::now().to_string(),
            total_pipelines: all_pipelines.len(),
            pipelines_grouped_by_virtual_model: grouped,
            all_pipelines,
        }
    }

    /// Write the artifact as pretty-printed JSON
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}
