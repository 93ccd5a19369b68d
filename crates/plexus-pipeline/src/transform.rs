//! The transformer layer: dialect-to-dialect translation
//!
//! Requests translate from the client's dialect into the backend's;
//! responses translate back. The canonical direction is Anthropic
//! Messages in, OpenAI chat-completions out. Matching dialects pass
//! through with only the target-model rewrite, which keeps the
//! passthrough path byte-stable for compatible clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use plexus_core::RequestContext;
use plexus_routing::{TransformerConfig, TransformerKind};

use crate::error::PipelineError;
use crate::inbound::InboundRequest;
use crate::wire::anthropic::{
    AnthropicContent, AnthropicMessage, AnthropicRequest, AnthropicResponse,
    AnthropicResponseBlock, AnthropicUsage,
};
use crate::wire::openai::{
    OpenAiContent, OpenAiFunction, OpenAiFunctionCall, OpenAiMessage, OpenAiRequest,
    OpenAiResponse, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};

/// Translates requests and responses between client and backend dialects
#[derive(Debug)]
pub struct TransformerLayer {
    config: TransformerConfig,
}

impl TransformerLayer {
    pub const fn new(config: TransformerConfig) -> Self {
        Self { config }
    }

    /// Translate an inbound request into the backend dialect
    pub fn request(
        &self,
        inbound: &InboundRequest,
        ctx: &mut RequestContext,
    ) -> Result<Value, PipelineError> {
        let target = &self.config.target_model;

        let body = match (self.config.kind, inbound) {
            (TransformerKind::OpenAi, InboundRequest::Anthropic(request)) => {
                let (converted, dropped) = anthropic_to_openai_request(request, target)?;
                ctx.record_audit(
                    "transformer",
                    format!(
                        "anthropic->openai: {} messages, {} tools ({dropped} dropped)",
                        converted.messages.len(),
                        converted.tools.as_ref().map_or(0, Vec::len),
                    ),
                );
                serde_json::to_value(converted)
                    .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?
            }
            (TransformerKind::Anthropic, InboundRequest::OpenAi(body)) => {
                let (converted, dropped) = openai_to_anthropic_request(body, target)?;
                ctx.record_audit(
                    "transformer",
                    format!(
                        "openai->anthropic: {} messages ({dropped} tools dropped)",
                        converted.messages.len(),
                    ),
                );
                serde_json::to_value(converted)
                    .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?
            }
            (TransformerKind::Anthropic | TransformerKind::Passthrough, InboundRequest::Anthropic(request)) => {
                let mut request = request.clone();
                request.model = target.clone();
                ctx.record_audit("transformer", "anthropic passthrough");
                serde_json::to_value(request)
                    .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?
            }
            (TransformerKind::OpenAi | TransformerKind::Passthrough, InboundRequest::OpenAi(body)) => {
                let mut body = body.clone();
                let Some(object) = body.as_object_mut() else {
                    return Err(PipelineError::InvalidRequest(
                        "request body must be a JSON object".to_owned(),
                    ));
                };
                object.insert("model".to_owned(), Value::String(target.clone()));
                ctx.record_audit("transformer", "openai passthrough");
                body
            }
        };

        Ok(body)
    }

    /// Translate the backend response into the client's dialect
    pub fn response(
        &self,
        inbound: &InboundRequest,
        upstream: Value,
        ctx: &mut RequestContext,
    ) -> Result<Value, PipelineError> {
        match (self.config.kind, inbound) {
            (TransformerKind::OpenAi, InboundRequest::Anthropic(_)) => {
                let response: OpenAiResponse = serde_json::from_value(upstream)
                    .map_err(|e| PipelineError::ResponseSchemaInvalid(e.to_string()))?;
                let converted = openai_to_anthropic_response(&response)?;
                ctx.record_audit(
                    "transformer",
                    format!("openai->anthropic response: {} blocks", converted.content.len()),
                );
                serde_json::to_value(converted)
                    .map_err(|e| PipelineError::ResponseSchemaInvalid(e.to_string()))
            }
            (TransformerKind::Anthropic, InboundRequest::OpenAi(_)) => {
                let response: AnthropicResponse = serde_json::from_value(upstream)
                    .map_err(|e| PipelineError::ResponseSchemaInvalid(e.to_string()))?;
                let converted = anthropic_to_openai_response(&response);
                ctx.record_audit("transformer", "anthropic->openai response");
                serde_json::to_value(converted)
                    .map_err(|e| PipelineError::ResponseSchemaInvalid(e.to_string()))
            }
            _ => Ok(upstream),
        }
    }
}

// -- Request direction: Anthropic -> OpenAI --

/// Convert an Anthropic request to the OpenAI dialect
///
/// Returns the converted request and how many tool definitions were
/// dropped as unrepairable.
pub fn anthropic_to_openai_request(
    request: &AnthropicRequest,
    target_model: &str,
) -> Result<(OpenAiRequest, usize), PipelineError> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.text();
        if !text.is_empty() {
            messages.push(OpenAiMessage::text("system", text));
        }
    }

    for message in &request.messages {
        convert_anthropic_message(message, &mut messages)?;
    }

    let (tools, dropped) = match &request.tools {
        Some(raw) if !raw.is_empty() => {
            let (tools, dropped) = convert_tools_to_openai(raw)?;
            (if tools.is_empty() { None } else { Some(tools) }, dropped)
        }
        _ => (None, 0),
    };

    let converted = OpenAiRequest {
        model: target_model.to_owned(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: request.stream,
        tools,
        tool_choice: None,
    };

    Ok((converted, dropped))
}

/// Convert one Anthropic message, appending the OpenAI messages it
/// expands into
///
/// Tool-result blocks become standalone `role:"tool"` messages; text
/// accumulates into one message; `tool_use` blocks attach as tool calls.
/// Non-text blocks with no special handling serialize to JSON text.
fn convert_anthropic_message(
    message: &AnthropicMessage,
    out: &mut Vec<OpenAiMessage>,
) -> Result<(), PipelineError> {
    match message.role.as_str() {
        "user" | "assistant" | "system" | "tool" => {}
        other => {
            return Err(PipelineError::UnsupportedMessageRole {
                role: other.to_owned(),
            });
        }
    }

    let blocks = match &message.content {
        AnthropicContent::Text(text) => {
            out.push(OpenAiMessage::text(&message.role, text.clone()));
            return Ok(());
        }
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();
    let mut emitted_tool_results = false;

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    text_parts.push(text.to_owned());
                }
            }
            Some("tool_use") => {
                let Some(name) = block.get("name").and_then(Value::as_str) else {
                    // Unusable as a call; keep it visible as JSON text
                    text_parts.push(block.to_string());
                    continue;
                };
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("call_{}", tool_calls.len()), str::to_owned);
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(OpenAiToolCall {
                    id,
                    tool_type: "function".to_owned(),
                    function: OpenAiFunctionCall {
                        name: name.to_owned(),
                        arguments: input.to_string(),
                    },
                });
            }
            Some("tool_result") => {
                let tool_call_id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                out.push(OpenAiMessage {
                    role: "tool".to_owned(),
                    content: Some(OpenAiContent::Text(tool_result_text(block.get("content")))),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id),
                });
                emitted_tool_results = true;
            }
            _ => text_parts.push(block.to_string()),
        }
    }

    let text = text_parts.join("\n");

    if !tool_calls.is_empty() {
        out.push(OpenAiMessage {
            role: message.role.clone(),
            content: if text.is_empty() {
                None
            } else {
                Some(OpenAiContent::Text(text))
            },
            name: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        });
    } else if !text.is_empty() || !emitted_tool_results {
        out.push(OpenAiMessage::text(&message.role, text));
    }

    Ok(())
}

/// Flatten a tool-result content field to text
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .map(|b| {
                b.get("text")
                    .and_then(Value::as_str)
                    .map_or_else(|| b.to_string(), str::to_owned)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// Convert raw tool definitions to the OpenAI form
///
/// Entries already in OpenAI form pass through; Anthropic-form entries
/// with a string `name` are rewritten (a missing schema is repaired to
/// an empty object schema); entries without a usable name are dropped
/// with a warning. A non-object entry fails the request.
pub fn convert_tools_to_openai(
    raw: &[Value],
) -> Result<(Vec<OpenAiTool>, usize), PipelineError> {
    let mut tools = Vec::new();
    let mut dropped = 0;

    for entry in raw {
        let Some(object) = entry.as_object() else {
            return Err(PipelineError::MalformedToolDefinition(format!(
                "tool entry is not an object: {entry}"
            )));
        };

        // Already OpenAI-shaped
        if object.get("type").and_then(Value::as_str) == Some("function")
            && object.contains_key("function")
            && let Ok(tool) = serde_json::from_value::<OpenAiTool>(entry.clone())
            && !tool.function.name.is_empty()
        {
            tools.push(tool);
            continue;
        }

        match object.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => {
                tools.push(OpenAiTool {
                    tool_type: "function".to_owned(),
                    function: OpenAiFunction {
                        name: name.to_owned(),
                        description: object
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        parameters: Some(
                            object
                                .get("input_schema")
                                .cloned()
                                .unwrap_or_else(|| json!({"type": "object"})),
                        ),
                    },
                });
            }
            _ => {
                tracing::warn!(tool = %entry, "dropping tool without a valid string name");
                dropped += 1;
            }
        }
    }

    Ok((tools, dropped))
}

// -- Request direction: OpenAI -> Anthropic --

/// Convert an OpenAI-dialect request body for an Anthropic backend
pub fn openai_to_anthropic_request(
    body: &Value,
    target_model: &str,
) -> Result<(AnthropicRequest, usize), PipelineError> {
    let request: OpenAiRequest = serde_json::from_value(body.clone())
        .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in &request.messages {
        match message.role.as_str() {
            "system" => system_parts.push(message.content_text()),
            "tool" => messages.push(AnthropicMessage {
                role: "user".to_owned(),
                content: AnthropicContent::Blocks(vec![json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content_text(),
                })]),
            }),
            "assistant" if message.tool_calls.is_some() => {
                let mut blocks = Vec::new();
                let text = message.content_text();
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in message.tool_calls.as_deref().unwrap_or_default() {
                    let input: Value = serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": input,
                    }));
                }
                messages.push(AnthropicMessage {
                    role: "assistant".to_owned(),
                    content: AnthropicContent::Blocks(blocks),
                });
            }
            "user" | "assistant" => messages.push(AnthropicMessage {
                role: message.role.clone(),
                content: AnthropicContent::Text(message.content_text()),
            }),
            other => {
                return Err(PipelineError::UnsupportedMessageRole {
                    role: other.to_owned(),
                });
            }
        }
    }

    let mut dropped = 0;
    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .filter_map(|tool| {
                if tool.function.name.is_empty() {
                    tracing::warn!("dropping tool without a valid string name");
                    dropped += 1;
                    return None;
                }
                Some(json!({
                    "name": tool.function.name,
                    "description": tool.function.description,
                    "input_schema": tool
                        .function
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object"})),
                }))
            })
            .collect::<Vec<_>>()
    });

    let converted = AnthropicRequest {
        model: target_model.to_owned(),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(crate::wire::anthropic::AnthropicSystem::Text(
                system_parts.join("\n"),
            ))
        },
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
        stream: request.stream,
        thinking: None,
        tools,
        tool_choice: None,
        metadata: None,
    };

    Ok((converted, dropped))
}

// -- Response direction: OpenAI -> Anthropic --

/// Convert an OpenAI response for an Anthropic-dialect client
pub fn openai_to_anthropic_response(
    response: &OpenAiResponse,
) -> Result<AnthropicResponse, PipelineError> {
    let Some(choice) = response.choices.first() else {
        return Err(PipelineError::ResponseSchemaInvalid(
            "response has no choices".to_owned(),
        ));
    };

    let mut content = Vec::new();

    if let Some(text) = &choice.message.content
        && !text.is_empty()
    {
        content.push(AnthropicResponseBlock::Text { text: text.clone() });
    }

    if let Some(tool_calls) = &choice.message.tool_calls {
        for call in tool_calls {
            // Arguments parse as JSON when possible; malformed argument
            // strings are preserved verbatim
            let input: Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
            content.push(AnthropicResponseBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }
    }

    if content.is_empty() {
        content.push(AnthropicResponseBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = match choice.finish_reason.as_deref() {
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        Some("content_filter") => "stop_sequence",
        // "stop", unknown values, and absent reasons all map to end_turn
        _ => "end_turn",
    };

    let usage = response.usage.clone().unwrap_or_default();

    Ok(AnthropicResponse {
        id: if response.id.is_empty() {
            format!("msg_{}", unique_suffix())
        } else {
            response.id.clone()
        },
        response_type: "message".to_owned(),
        role: "assistant".to_owned(),
        content,
        model: response.model.clone(),
        stop_reason: Some(stop_reason.to_owned()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

// -- Response direction: Anthropic -> OpenAI --

/// Convert an Anthropic response for an OpenAI-dialect client
pub fn anthropic_to_openai_response(response: &AnthropicResponse) -> OpenAiResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            AnthropicResponseBlock::Text { text: t } => text.push_str(t),
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(OpenAiToolCall {
                    id: id.clone(),
                    tool_type: "function".to_owned(),
                    function: OpenAiFunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
        }
    }

    let finish_reason = match response.stop_reason.as_deref() {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    };

    let usage = &response.usage;

    OpenAiResponse {
        id: response.id.clone(),
        object: "chat.completion".to_owned(),
        created: now_secs(),
        model: response.model.clone(),
        choices: vec![crate::wire::openai::OpenAiChoice {
            index: 0,
            message: crate::wire::openai::OpenAiChoiceMessage {
                role: "assistant".to_owned(),
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(finish_reason.to_owned()),
        }],
        usage: Some(OpenAiUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unique id suffix without a uuid dependency
fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{millis:x}{count:04x}")
}
