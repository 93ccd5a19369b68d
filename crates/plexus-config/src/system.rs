use indexmap::IndexMap;
use serde::Deserialize;

/// System configuration: provider-type templates keyed by tag
///
/// Ships with built-in templates for every recognized backend family; a
/// user-supplied file extends or overrides them. Tags referenced by the
/// user config must resolve here, which the assembler enforces.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Tag → template bindings
    #[serde(default, alias = "providerTypes")]
    pub provider_types: IndexMap<String, ProviderTypeTemplate>,
}

/// Template describing how to talk to one backend family
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderTypeTemplate {
    /// Path appended to the provider base URL when absent
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Wire protocol: `openai` or `anthropic`
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Per-attempt upstream timeout in milliseconds
    #[serde(default = "default_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,
    /// Retry budget for timeouts and transient 5xx
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,
    /// Transformer tag: the dialect requests are translated into
    #[serde(default = "default_protocol")]
    pub transformer: String,
    /// Compat module name; defaults to the tag the template is bound to
    #[serde(default, alias = "serverCompatibility")]
    pub server_compatibility: Option<String>,
}

impl Default for ProviderTypeTemplate {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            protocol: default_protocol(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            transformer: default_protocol(),
            server_compatibility: None,
        }
    }
}

fn default_endpoint() -> String {
    "/chat/completions".to_owned()
}

fn default_protocol() -> String {
    "openai".to_owned()
}

const fn default_timeout_ms() -> u64 {
    60_000
}

const fn default_max_retries() -> u32 {
    2
}

/// Tags every installation recognizes out of the box
const BUILTIN_OPENAI_TAGS: &[&str] = &[
    "lmstudio",
    "ollama",
    "vllm",
    "qwen",
    "iflow",
    "openai",
    "gemini",
    "modelscope",
    "generic",
];

impl SystemConfig {
    /// The built-in template set covering all recognized tags
    pub fn builtin() -> Self {
        let mut provider_types = IndexMap::new();

        for tag in BUILTIN_OPENAI_TAGS {
            provider_types.insert(
                (*tag).to_owned(),
                ProviderTypeTemplate {
                    server_compatibility: Some((*tag).to_owned()),
                    ..ProviderTypeTemplate::default()
                },
            );
        }

        provider_types.insert(
            "anthropic".to_owned(),
            ProviderTypeTemplate {
                endpoint: "/v1/messages".to_owned(),
                protocol: "anthropic".to_owned(),
                transformer: "anthropic".to_owned(),
                server_compatibility: Some("anthropic".to_owned()),
                ..ProviderTypeTemplate::default()
            },
        );

        Self { provider_types }
    }

    /// Resolve a tag to its template
    pub fn template(&self, tag: &str) -> Option<&ProviderTypeTemplate> {
        self.provider_types.get(tag)
    }

    /// Merge user-supplied templates over the built-ins
    pub fn merged_over_builtin(mut self) -> Self {
        let mut base = Self::builtin();
        base.provider_types.extend(self.provider_types.drain(..));
        base
    }
}
