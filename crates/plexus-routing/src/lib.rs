//! Routing core for Plexus
//!
//! Turns the user + system configuration into an immutable routing table
//! of fully-resolved pipelines, classifies incoming requests onto
//! virtual-model categories, and picks one concrete pipeline per request
//! with health tracking, per-key cooldowns, and temporary blacklisting.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod artifact;
mod assemble;
mod balance;
mod classify;
mod error;
mod events;
mod health;
mod keypool;
mod outcome;
mod rules;
mod table;
mod tags;

pub use artifact::PipelineTableArtifact;
pub use assemble::assemble;
pub use balance::{LoadBalancer, score_candidate};
pub use classify::{LONG_CONTEXT_TOKEN_THRESHOLD, RequestSignals, classify};
pub use error::{ConfigError, ConfigIssue, RoutingError};
pub use events::{HealthEvent, HealthEventSender};
pub use health::{BlacklistWindows, HealthSnapshot, HealthStatus, PipelineHealthTracker};
pub use keypool::{CooldownPolicy, KeyLease, KeyPool, KeySnapshot};
pub use outcome::AttemptOutcome;
pub use rules::{RouteTarget, parse_rule};
pub use table::{
    CompatConfig, HttpCallConfig, LayerConfigs, PipelineConfig, ProtocolConfig, RoutingTable,
    TransformerConfig,
};
pub use tags::{CompatTag, ProtocolKind, TransformerKind};
