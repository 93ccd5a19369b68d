use serde::{Deserialize, Serialize};

/// Virtual-model category selecting a candidate set of pipelines
///
/// Not a model name: the classifier maps an incoming request onto one of
/// these, and the routing table maps each onto an ordered pipeline list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    /// Fallback category; mandatory in every configuration
    Default,
    /// Requests carrying tool definitions (other than web-search tools)
    Coding,
    /// Requests with an extended-thinking field
    Reasoning,
    /// Requests whose estimated prompt exceeds the long-context threshold
    LongContext,
    /// Requests carrying a web-search-shaped tool
    WebSearch,
}

impl Category {
    /// All categories, in routing-table order
    pub const ALL: [Self; 5] = [
        Self::Default,
        Self::Coding,
        Self::Reasoning,
        Self::LongContext,
        Self::WebSearch,
    ];

    /// The configuration key for this category
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Coding => "coding",
            Self::Reasoning => "reasoning",
            Self::LongContext => "longContext",
            Self::WebSearch => "webSearch",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_camel_case() {
        let json = serde_json::to_string(&Category::LongContext).unwrap();
        assert_eq!(json, "\"longContext\"");
    }

    #[test]
    fn display_matches_config_key() {
        assert_eq!(Category::WebSearch.to_string(), "webSearch");
        assert_eq!(Category::Default.to_string(), "default");
    }
}
