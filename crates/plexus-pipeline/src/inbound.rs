//! Inbound request and outbound response envelopes
//!
//! The router accepts two client dialects. Anthropic requests are typed;
//! OpenAI requests stay as raw JSON so a passthrough pipeline forwards
//! the client body byte-for-byte apart from the rewrites the contract
//! requires (model, `stream:false`, max-tokens clamp).

use serde_json::Value;

use plexus_routing::RequestSignals;

use crate::wire::anthropic::AnthropicRequest;

/// A client request in whichever dialect it arrived
#[derive(Debug, Clone)]
pub enum InboundRequest {
    Anthropic(AnthropicRequest),
    OpenAi(Value),
}

impl InboundRequest {
    /// The model name the client asked for
    pub fn requested_model(&self) -> &str {
        match self {
            Self::Anthropic(request) => &request.model,
            Self::OpenAi(body) => body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        }
    }

    /// Whether the client asked for a streamed response
    pub fn stream_requested(&self) -> bool {
        match self {
            Self::Anthropic(request) => request.stream.unwrap_or(false),
            Self::OpenAi(body) => body
                .get("stream")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    /// Shape summary for the classifier
    pub fn signals(&self) -> RequestSignals {
        match self {
            Self::Anthropic(request) => anthropic_signals(request),
            Self::OpenAi(body) => openai_signals(body),
        }
    }
}

fn anthropic_signals(request: &AnthropicRequest) -> RequestSignals {
    let mut content_chars: usize = request
        .messages
        .iter()
        .map(|m| m.content.char_len())
        .sum();
    if let Some(system) = &request.system {
        content_chars += system.char_len();
    }

    let (tools_json_chars, tool_markers, tool_count) = tool_signals(request.tools.as_deref());

    RequestSignals {
        content_chars,
        tools_json_chars,
        tool_markers,
        tool_count,
        has_thinking: request.has_thinking(),
    }
}

fn openai_signals(body: &Value) -> RequestSignals {
    let mut content_chars = 0;

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for message in messages {
            match message.get("content") {
                Some(Value::String(text)) => content_chars += text.len(),
                Some(Value::Array(parts)) => {
                    for part in parts {
                        content_chars += part
                            .get("text")
                            .and_then(Value::as_str)
                            .map_or_else(|| part.to_string().len(), str::len);
                    }
                }
                _ => {}
            }
        }
    }

    let tools = body.get("tools").and_then(Value::as_array);
    let (tools_json_chars, tool_markers, tool_count) = tool_signals(tools.map(Vec::as_slice));

    RequestSignals {
        content_chars,
        tools_json_chars,
        tool_markers,
        tool_count,
        // `thinking` is an Anthropic-dialect field
        has_thinking: false,
    }
}

/// Extract classification signals from raw tool definitions
fn tool_signals(tools: Option<&[Value]>) -> (usize, Vec<String>, usize) {
    let Some(tools) = tools else {
        return (0, Vec::new(), 0);
    };

    let json_chars = serde_json::to_string(tools).map_or(0, |s| s.len());

    let mut markers = Vec::new();
    for tool in tools {
        for key in ["name", "type"] {
            if let Some(value) = tool.get(key).and_then(Value::as_str) {
                markers.push(value.to_ascii_lowercase());
            }
        }
        // OpenAI-shaped tools nest the name under `function`
        if let Some(name) = tool
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
        {
            markers.push(name.to_ascii_lowercase());
        }
    }

    (json_chars, markers, tools.len())
}
