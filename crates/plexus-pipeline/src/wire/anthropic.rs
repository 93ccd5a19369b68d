//! Anthropic Messages API wire format
//!
//! Request content blocks are kept as raw JSON values: clients send
//! text, images, tool uses, and tool results in one array, and the
//! transformer interprets (and where necessary repairs) them. Response
//! types are fully typed since we produce them ourselves.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anthropic Messages request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    /// Requested model name (a virtual name from the router's viewpoint)
    pub model: String,
    /// Conversation messages
    pub messages: Vec<AnthropicMessage>,
    /// System prompt (string or content blocks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<AnthropicSystem>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Whether to stream (the core degrades this to a buffered response)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Extended-thinking configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
    /// Tool definitions, kept raw for repair/drop handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    /// Tool choice configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Request metadata, forwarded untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AnthropicRequest {
    /// Whether the thinking field is present and non-empty
    pub fn has_thinking(&self) -> bool {
        self.thinking
            .as_ref()
            .is_some_and(|v| !v.is_null() && v.as_object().is_none_or(|o| !o.is_empty()))
    }
}

/// One conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

/// Message content: a plain string or an array of content blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl AnthropicContent {
    /// Total characters of text content, counting non-text blocks by
    /// their JSON length
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Blocks(blocks) => blocks.iter().map(block_char_len).sum(),
        }
    }
}

fn block_char_len(block: &Value) -> usize {
    block
        .get("text")
        .and_then(Value::as_str)
        .map_or_else(|| block.to_string().len(), str::len)
}

/// System prompt: a string or an array of text blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicSystem {
    Text(String),
    Blocks(Vec<Value>),
}

impl AnthropicSystem {
    /// Flatten to plain text
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn char_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Blocks(blocks) => blocks.iter().map(block_char_len).sum(),
        }
    }
}

// -- Response types --

/// Anthropic Messages response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<AnthropicResponseBlock>,
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

/// Content block within a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

/// Token usage in a response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Tool definition in the Anthropic dialect, used when translating
/// OpenAI-dialect requests for Anthropic-protocol backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_and_block_content_both_deserialize() {
        let request: AnthropicRequest = serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "user", "content": [{"type": "text", "text": "blocks"}]}
            ]
        }))
        .unwrap();

        assert_eq!(request.messages[0].content.char_len(), 2);
        assert_eq!(request.messages[1].content.char_len(), 6);
    }

    #[test]
    fn system_blocks_flatten_to_text() {
        let system: AnthropicSystem = serde_json::from_value(serde_json::json!([
            {"type": "text", "text": "one"},
            {"type": "text", "text": "two"}
        ]))
        .unwrap();
        assert_eq!(system.text(), "one\ntwo");
    }

    #[test]
    fn empty_thinking_object_does_not_count() {
        let mut request: AnthropicRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "messages": [],
            "thinking": {}
        }))
        .unwrap();
        assert!(!request.has_thinking());

        request.thinking = Some(serde_json::json!({"type": "enabled", "budget_tokens": 2048}));
        assert!(request.has_thinking());
    }

    #[test]
    fn non_text_blocks_count_by_json_length() {
        let content: AnthropicContent = serde_json::from_value(serde_json::json!([
            {"type": "image", "source": {"type": "url", "data": "http://x/y.png"}}
        ]))
        .unwrap();
        assert!(content.char_len() > 20);
    }

    #[test]
    fn response_round_trips() {
        let response = AnthropicResponse {
            id: "msg_1".to_owned(),
            response_type: "message".to_owned(),
            role: "assistant".to_owned(),
            content: vec![AnthropicResponseBlock::Text {
                text: "hello".to_owned(),
            }],
            model: "m".to_owned(),
            stop_reason: Some("end_turn".to_owned()),
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: 3,
                output_tokens: 5,
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["type"], "message");
    }
}
