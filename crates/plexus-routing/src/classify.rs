//! Virtual-model classification
//!
//! Deterministic, stateless mapping from request shape to category using
//! a priority-ordered rule list; the first match wins. Token counts are
//! approximated as character length / 4 — no tokenizer dependency, so
//! the same request always classifies the same way.

use plexus_core::Category;

/// Estimated-token threshold above which a request is long-context
pub const LONG_CONTEXT_TOKEN_THRESHOLD: u64 = 60_000;

/// Substrings of a tool name or type that mark it as a web-search tool
const WEB_SEARCH_MARKERS: &[&str] = &["web_search", "browser", "search"];

/// Shape summary extracted from an inbound request
///
/// Built by the ingress layer from whichever dialect the client spoke;
/// classification itself never touches wire types.
#[derive(Debug, Default, Clone)]
pub struct RequestSignals {
    /// Total characters of message text plus the system prompt
    pub content_chars: usize,
    /// Characters of the JSON-serialized tool definitions
    pub tools_json_chars: usize,
    /// Lowercased name and type strings of each tool
    pub tool_markers: Vec<String>,
    /// Number of tool definitions
    pub tool_count: usize,
    /// Whether the request carries a non-empty `thinking` field
    pub has_thinking: bool,
}

impl RequestSignals {
    /// Approximate token count: character length / 4
    pub fn estimated_tokens(&self) -> u64 {
        ((self.content_chars + self.tools_json_chars) / 4) as u64
    }

    fn has_web_search_tool(&self) -> bool {
        self.tool_markers.iter().any(|marker| {
            WEB_SEARCH_MARKERS
                .iter()
                .any(|needle| marker.contains(needle))
        })
    }
}

/// Classify a request onto its virtual-model category
///
/// Priority order: long context, web search, reasoning, coding, default.
pub fn classify(signals: &RequestSignals) -> Category {
    if signals.estimated_tokens() >= LONG_CONTEXT_TOKEN_THRESHOLD {
        return Category::LongContext;
    }
    if signals.has_web_search_tool() {
        return Category::WebSearch;
    }
    if signals.has_thinking {
        return Category::Reasoning;
    }
    if signals.tool_count > 0 {
        return Category::Coding;
    }
    Category::Default
}
