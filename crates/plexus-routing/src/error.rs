use http::StatusCode;
use plexus_core::{Category, HttpError};
use thiserror::Error;

/// A single problem found while validating the configuration
///
/// The assembler collects every issue before failing, so one run surfaces
/// the full list instead of one problem per attempt.
#[derive(Debug, Error)]
pub enum ConfigIssue {
    #[error("router.{category}: {detail}")]
    RuleSyntax { category: Category, detail: String },

    #[error("router.{category} references unknown provider `{provider}`")]
    UnknownProvider { category: Category, provider: String },

    #[error("router.{category}: provider `{provider}` does not serve model `{model}`")]
    UnknownModel {
        category: Category,
        provider: String,
        model: String,
    },

    #[error("router.default must be present and non-empty")]
    EmptyDefault,

    #[error("provider `{provider}` has no API keys")]
    NoApiKeys { provider: String },

    #[error("provider `{provider}`: {kind} tag `{tag}` does not resolve in the system config")]
    UnresolvedTag {
        provider: String,
        kind: &'static str,
        tag: String,
    },

    #[error("provider `{provider}`: unknown protocol `{protocol}`")]
    UnknownProtocol { provider: String, protocol: String },

    #[error("provider `{provider}`: unknown transformer `{transformer}`")]
    UnknownTransformer { provider: String, transformer: String },
}

/// Configuration validation failure carrying every problem found
#[derive(Debug)]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

impl std::error::Error for ConfigError {}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "configuration invalid ({} problems):", self.issues.len())?;
        for issue in &self.issues {
            writeln!(f, "  - {issue}")?;
        }
        Ok(())
    }
}

/// Request-time routing failures
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The classified category has no pipelines and neither does `default`
    #[error("no pipelines configured for category `{category}`")]
    NoPipelineForCategory { category: Category },

    /// Every candidate is blacklisted, cooling down, or saturated
    #[error("no eligible pipeline for category `{category}`")]
    NoEligiblePipeline { category: Category },
}

impl HttpError for RoutingError {
    fn status_code(&self) -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    fn error_type(&self) -> &str {
        match self {
            Self::NoPipelineForCategory { .. } => "no_pipeline_for_category",
            Self::NoEligiblePipeline { .. } => "no_eligible_pipeline",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}
