//! The server-compatibility layer: per-backend quirks
//!
//! Pure, synchronous request touch-ups selected by compat tag at
//! assembly time: endpoint-path correction, tool-schema fix-ups the
//! target server needs, the max-tokens clamp, the streaming gate, and
//! header additions. No network, no shared state.

use http::header::{HeaderName, HeaderValue};
use serde_json::{Value, json};

use plexus_core::RequestContext;
use plexus_routing::{CompatConfig, CompatTag};

use crate::protocol::Transport;

/// Anthropic API version header required by Anthropic backends
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Applies one backend family's quirks to an outbound request
#[derive(Debug)]
pub struct CompatLayer {
    config: CompatConfig,
}

impl CompatLayer {
    pub const fn new(config: CompatConfig) -> Self {
        Self { config }
    }

    pub const fn tag(&self) -> CompatTag {
        self.config.tag
    }

    /// Apply quirks to the translated body and transport in place
    pub fn prepare(&self, body: &mut Value, transport: &mut Transport, ctx: &mut RequestContext) {
        self.correct_endpoint(transport);
        let clamped = self.clamp_max_tokens(body);

        // Streaming transcoding is outside the core contract; every
        // backend gets a buffered request and clients get full bodies
        body["stream"] = Value::Bool(false);

        self.touch_up_tools(body);
        self.add_headers(transport);

        ctx.record_audit(
            "compat",
            format!(
                "{}: endpoint {}, max_tokens {} (clamp {})",
                self.config.tag,
                transport.endpoint.path(),
                body.get("max_tokens").and_then(Value::as_u64).unwrap_or(0),
                if clamped { "applied" } else { "kept" },
            ),
        );
    }

    /// Append the expected path when the configured base URL lacks it
    fn correct_endpoint(&self, transport: &mut Transport) {
        let suffix = self.config.endpoint_suffix.as_str();
        if suffix.is_empty() {
            return;
        }

        let path = transport.endpoint.path().trim_end_matches('/').to_owned();
        if !path.ends_with(suffix) {
            transport.endpoint.set_path(&format!("{path}{suffix}"));
        }
    }

    /// Clamp `max_tokens` to the pipeline maximum; absent means maximum
    ///
    /// Returns whether the client value was reduced.
    fn clamp_max_tokens(&self, body: &mut Value) -> bool {
        let limit = u64::from(self.config.max_tokens);
        let requested = body.get("max_tokens").and_then(Value::as_u64);

        match requested {
            Some(value) if value <= limit => false,
            Some(_) => {
                body["max_tokens"] = json!(limit);
                true
            }
            None => {
                body["max_tokens"] = json!(limit);
                false
            }
        }
    }

    /// Tool-schema fix-ups the target server needs
    fn touch_up_tools(&self, body: &mut Value) {
        let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
            return;
        };

        match self.config.tag {
            CompatTag::Gemini => {
                // Gemini rejects JSON-Schema metadata keys
                for tool in tools {
                    if let Some(parameters) = tool
                        .get_mut("function")
                        .and_then(|f| f.get_mut("parameters"))
                    {
                        strip_keys(parameters, &["$schema", "additionalProperties"]);
                    }
                }
            }
            CompatTag::Qwen | CompatTag::IFlow => {
                // These servers require an explicit object type on every schema
                for tool in tools {
                    if let Some(parameters) = tool
                        .get_mut("function")
                        .and_then(|f| f.get_mut("parameters"))
                        .and_then(Value::as_object_mut)
                        && !parameters.contains_key("type")
                    {
                        parameters.insert("type".to_owned(), json!("object"));
                    }
                }
            }
            CompatTag::LmStudio | CompatTag::Ollama => {
                // Local servers choke on the OpenAI `strict` flag
                for tool in tools {
                    if let Some(function) = tool.get_mut("function").and_then(Value::as_object_mut)
                    {
                        function.remove("strict");
                    }
                }
            }
            CompatTag::Anthropic => {
                // Anthropic-dialect tools carry input_schema; repair if missing
                for tool in tools {
                    if let Some(object) = tool.as_object_mut()
                        && object.contains_key("name")
                        && !object.contains_key("input_schema")
                    {
                        object.insert("input_schema".to_owned(), json!({"type": "object"}));
                    }
                }
            }
            CompatTag::Vllm | CompatTag::OpenAi | CompatTag::ModelScope | CompatTag::Generic => {}
        }
    }

    fn add_headers(&self, transport: &mut Transport) {
        if self.config.tag == CompatTag::Anthropic {
            transport.headers.push((
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            ));
        }
    }
}

/// Remove keys recursively from a JSON schema
fn strip_keys(schema: &mut Value, keys: &[&str]) {
    match schema {
        Value::Object(object) => {
            for key in keys {
                object.remove(*key);
            }
            for value in object.values_mut() {
                strip_keys(value, keys);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_keys(item, keys);
            }
        }
        _ => {}
    }
}
