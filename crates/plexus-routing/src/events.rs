//! Health events for optional observers
//!
//! The balancer and health tracker publish state changes on a channel
//! injected at construction. The core functions identically with zero
//! observers; sends are best-effort and never block request handling.

use plexus_core::Category;

use crate::outcome::AttemptOutcome;

/// A state change worth surfacing to observers
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// A pipeline was blacklisted until the given duration elapses
    PipelineBlacklisted {
        pipeline_id: String,
        outcome: AttemptOutcome,
        window_ms: u64,
    },
    /// A pipeline degraded after repeated failures
    PipelineDegraded { pipeline_id: String },
    /// A pipeline returned to healthy after consecutive successes
    PipelineRecovered { pipeline_id: String },
    /// Every pipeline in a category was ineligible at pick time
    CategoryExhausted { category: Category },
}

/// Sender half injected into the balancer; `None` means no observers
pub type HealthEventSender = tokio::sync::mpsc::UnboundedSender<HealthEvent>;
