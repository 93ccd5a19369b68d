use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Top-level user configuration
///
/// Describes the providers the router may talk to and how virtual-model
/// categories map onto them. Validation beyond basic shape happens in the
/// assembler, which collects every problem instead of stopping at the
/// first.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// Backend providers, in file order (order is semantic for routing)
    pub providers: Vec<ProviderSpec>,
    /// Category → `"provider,model[;provider,model]*"` routing rules
    pub router: RouterRules,
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Pipeline blacklist windows
    #[serde(default, alias = "blacklistSettings")]
    pub blacklist_settings: BlacklistSettings,
}

impl UserConfig {
    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderSpec> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// A single backend provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    /// Unique name referenced by routing rules
    pub name: String,
    /// Base URL of the provider's API (scheme + host + optional path prefix)
    #[serde(alias = "apiBaseUrl")]
    pub api_base_url: Url,
    /// One API key or a list of keys rotated by the key pool
    #[serde(alias = "apiKey")]
    pub api_key: ApiKeys,
    /// Models this provider serves
    pub models: Vec<ModelEntry>,
    /// Routing weight; higher weights order first within a category
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Provider-level max-tokens clamp (model entries override)
    #[serde(default, alias = "maxTokens")]
    pub max_tokens: Option<u32>,
    /// Server-compatibility selector; absent means `generic`
    #[serde(default, alias = "serverCompatibility")]
    pub server_compatibility: Option<CompatSelector>,
    /// Protocol tag override; absent means the template's protocol
    #[serde(default)]
    pub protocol: Option<String>,
    /// Transformer tag override; absent means the template's transformer
    #[serde(default)]
    pub transformer: Option<String>,
    /// Maximum in-flight requests per API key
    #[serde(default = "default_max_concurrent", alias = "maxConcurrent")]
    pub max_concurrent: u32,
}

const fn default_weight() -> u32 {
    1
}

const fn default_max_concurrent() -> u32 {
    16
}

/// One key or many; normalized by the key pool into indexed slots
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiKeys {
    /// A single key (key index 0)
    One(SecretString),
    /// Multiple keys rotated by index
    Many(Vec<SecretString>),
}

impl ApiKeys {
    /// Number of key slots
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(keys) => keys.len(),
        }
    }

    /// Whether no keys are configured (invalid; caught at assembly)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key at the given slot index
    pub fn get(&self, index: usize) -> Option<&SecretString> {
        match self {
            Self::One(key) => (index == 0).then_some(key),
            Self::Many(keys) => keys.get(index),
        }
    }
}

/// A model entry: bare name or name plus per-model overrides
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ModelEntry {
    /// Bare model name
    Name(String),
    /// Model with overrides
    Detailed {
        /// Model identifier sent to the provider
        name: String,
        /// Per-model max-tokens clamp
        #[serde(default, alias = "maxTokens")]
        max_tokens: Option<u32>,
    },
}

impl ModelEntry {
    /// The model identifier
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    /// Per-model max-tokens override, if any
    pub const fn max_tokens(&self) -> Option<u32> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { max_tokens, .. } => *max_tokens,
        }
    }
}

/// Server-compatibility selector on a provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompatSelector {
    /// Tag resolved against the system config's provider types
    #[serde(rename = "use")]
    pub tag: String,
    /// Per-tag options passed through to the compat layer
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Category routing rules, each `"provider,model[;provider,model]*"`
///
/// Kept as raw strings here; the assembler parses them exactly once into
/// structured targets. `default` is mandatory.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterRules {
    /// Mandatory fallback category
    pub default: String,
    #[serde(default)]
    pub coding: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default, alias = "longContext")]
    pub long_context: Option<String>,
    #[serde(default, alias = "webSearch")]
    pub web_search: Option<String>,
}

impl RouterRules {
    /// The raw rule string for a category, if configured
    pub fn rule(&self, category: plexus_core::Category) -> Option<&str> {
        use plexus_core::Category;
        match category {
            Category::Default => Some(self.default.as_str()),
            Category::Coding => self.coding.as_deref(),
            Category::Reasoning => self.reasoning.as_deref(),
            Category::LongContext => self.long_context.as_deref(),
            Category::WebSearch => self.web_search.as_deref(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,
    /// Verbose request logging
    #[serde(default)]
    pub debug: bool,
    /// Hard per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms", alias = "requestTimeoutMs")]
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            debug: false,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

const fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_request_timeout_ms() -> u64 {
    120_000
}

/// Pipeline-level blacklist windows, in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlacklistSettings {
    /// How long a pipeline stays unhealthy after repeated 429s
    #[serde(default = "default_timeout_429_ms", alias = "timeout429")]
    pub timeout_429_ms: u64,
    /// How long a pipeline stays unhealthy after a fatal error
    #[serde(default = "default_timeout_error_ms", alias = "timeoutError")]
    pub timeout_error_ms: u64,
}

impl Default for BlacklistSettings {
    fn default() -> Self {
        Self {
            timeout_429_ms: default_timeout_429_ms(),
            timeout_error_ms: default_timeout_error_ms(),
        }
    }
}

const fn default_timeout_429_ms() -> u64 {
    60_000
}

const fn default_timeout_error_ms() -> u64 {
    300_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> UserConfig {
        toml::from_str(toml_text).expect("config parses")
    }

    #[test]
    fn single_key_and_bare_model_names() {
        let config = parse(
            r#"
            [[providers]]
            name = "lmstudio"
            api_base_url = "http://localhost:1234/v1"
            api_key = "sk-local"
            models = ["gpt-oss-20b"]

            [router]
            default = "lmstudio,gpt-oss-20b"
            "#,
        );

        let provider = config.provider("lmstudio").unwrap();
        assert_eq!(provider.api_key.len(), 1);
        assert_eq!(provider.models[0].name(), "gpt-oss-20b");
        assert_eq!(provider.models[0].max_tokens(), None);
        assert_eq!(provider.weight, 1);
        assert_eq!(provider.max_concurrent, 16);
    }

    #[test]
    fn key_list_and_detailed_models() {
        let config = parse(
            r#"
            [[providers]]
            name = "openrouter"
            api_base_url = "https://openrouter.ai/api/v1"
            api_key = ["k0", "k1", "k2"]
            models = [{ name = "deepseek-v3", maxTokens = 8192 }, "qwen-max"]
            weight = 5
            maxTokens = 4096

            [router]
            default = "openrouter,deepseek-v3"
            coding = "openrouter,qwen-max"
            "#,
        );

        let provider = config.provider("openrouter").unwrap();
        assert_eq!(provider.api_key.len(), 3);
        assert!(provider.api_key.get(3).is_none());
        assert_eq!(provider.models[0].max_tokens(), Some(8192));
        assert_eq!(provider.models[1].name(), "qwen-max");
        assert_eq!(provider.max_tokens, Some(4096));
        assert_eq!(provider.weight, 5);
    }

    #[test]
    fn camel_case_aliases_accepted() {
        let config = parse(
            r#"
            [[providers]]
            name = "p"
            apiBaseUrl = "http://h/v1"
            apiKey = "k"
            models = ["m"]

            [router]
            default = "p,m"
            longContext = "p,m"

            [blacklistSettings]
            timeout429 = 1000
            timeoutError = 2000
            "#,
        );

        assert!(config.router.long_context.is_some());
        assert_eq!(config.blacklist_settings.timeout_429_ms, 1000);
        assert_eq!(config.blacklist_settings.timeout_error_ms, 2000);
    }

    #[test]
    fn rule_lookup_by_category() {
        use plexus_core::Category;

        let config = parse(
            r#"
            [[providers]]
            name = "p"
            api_base_url = "http://h/v1"
            api_key = "k"
            models = ["m"]

            [router]
            default = "p,m"
            reasoning = "p,m"
            "#,
        );

        assert_eq!(config.router.rule(Category::Default), Some("p,m"));
        assert_eq!(config.router.rule(Category::Reasoning), Some("p,m"));
        assert_eq!(config.router.rule(Category::WebSearch), None);
    }

    #[test]
    fn defaults_applied() {
        let config = parse(
            r#"
            [[providers]]
            name = "p"
            api_base_url = "http://h/v1"
            api_key = "k"
            models = ["m"]

            [router]
            default = "p,m"
            "#,
        );

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_ms, 120_000);
        assert_eq!(config.blacklist_settings.timeout_429_ms, 60_000);
        assert_eq!(config.blacklist_settings.timeout_error_ms, 300_000);
    }

    #[test]
    fn unknown_fields_rejected() {
        let result: Result<UserConfig, _> = toml::from_str(
            r#"
            [[providers]]
            name = "p"
            api_base_url = "http://h/v1"
            api_key = "k"
            models = ["m"]
            surprise = true

            [router]
            default = "p,m"
            "#,
        );
        assert!(result.is_err());
    }
}
