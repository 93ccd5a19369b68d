//! Closed tag vocabularies resolved at assembly time
//!
//! Config files carry string tags; the assembler resolves every one of
//! them into these enums exactly once. Nothing looks up a module by
//! string at request time.

/// Wire protocol a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// OpenAI chat-completions dialect
    OpenAi,
    /// Anthropic Messages dialect
    Anthropic,
}

impl ProtocolKind {
    /// Resolve a protocol tag; `None` for unknown tags
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

/// Target dialect of the request transformer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformerKind {
    /// Translate into the OpenAI chat-completions dialect
    OpenAi,
    /// Translate into the Anthropic Messages dialect
    Anthropic,
    /// Forward the client body unchanged apart from the model rewrite
    Passthrough,
}

impl TransformerKind {
    /// Resolve a transformer tag; `None` for unknown tags
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "passthrough" => Some(Self::Passthrough),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Per-backend quirk module in the server-compatibility layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatTag {
    LmStudio,
    Ollama,
    Vllm,
    Qwen,
    IFlow,
    Anthropic,
    OpenAi,
    Gemini,
    ModelScope,
    Generic,
}

impl CompatTag {
    /// Resolve a compat module name; unknown names fall back to `Generic`
    pub fn from_name(name: &str) -> Self {
        match name {
            "lmstudio" => Self::LmStudio,
            "ollama" => Self::Ollama,
            "vllm" => Self::Vllm,
            "qwen" => Self::Qwen,
            "iflow" => Self::IFlow,
            "anthropic" => Self::Anthropic,
            "openai" => Self::OpenAi,
            "gemini" => Self::Gemini,
            "modelscope" => Self::ModelScope,
            _ => Self::Generic,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LmStudio => "lmstudio",
            Self::Ollama => "ollama",
            Self::Vllm => "vllm",
            Self::Qwen => "qwen",
            Self::IFlow => "iflow",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::ModelScope => "modelscope",
            Self::Generic => "generic",
        }
    }

    /// Whether the backend expects the OpenAI chat-completions path
    pub const fn is_openai_like(self) -> bool {
        !matches!(self, Self::Anthropic)
    }
}

impl std::fmt::Display for CompatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
