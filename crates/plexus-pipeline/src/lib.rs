//! Four-layer pipeline execution for Plexus
//!
//! Every request flows through a fixed ordered chain — transformer
//! (dialect translation) → protocol (endpoint and auth binding) →
//! server-compatibility (per-backend quirks) → server (the one HTTP
//! call). Layers are pre-wired per pipeline at assembly time; there is
//! no per-request module discovery.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod chain;
mod compat;
mod error;
mod inbound;
mod protocol;
mod registry;
mod server;
mod transform;
pub mod wire;

pub use chain::{ChainOutcome, LayerChain};
pub use compat::CompatLayer;
pub use error::PipelineError;
pub use inbound::InboundRequest;
pub use protocol::{ProtocolLayer, Transport};
pub use registry::{LifecycleState, PipelineInstance, PipelineRegistry};
pub use server::ServerLayer;
pub use transform::TransformerLayer;
