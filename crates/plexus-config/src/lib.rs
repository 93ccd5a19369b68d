//! Configuration for the Plexus router
//!
//! Two documents feed the assembler: the *user config* (providers, API
//! keys, category → provider,model routing rules) and the *system config*
//! (provider-type templates keyed by tag). Both are TOML with
//! `{{ env.VAR }}` expansion applied to the raw text before
//! deserialization, so secrets stay out of the files themselves.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod env;
mod loader;
mod system;
mod user;

pub use env::expand_env;
pub use loader::LoadError;
pub use system::{ProviderTypeTemplate, SystemConfig};
pub use user::{
    ApiKeys, BlacklistSettings, CompatSelector, ModelEntry, ProviderSpec, RouterRules,
    ServerSettings, UserConfig,
};
