use std::path::Path;

use thiserror::Error;

use crate::{SystemConfig, UserConfig, expand_env};

/// Errors raised while reading a configuration file
#[derive(Debug, Error)]
pub enum LoadError {
    /// File could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// `{{ env.VAR }}` expansion failed
    #[error("config variable expansion failed in {path}: {detail}")]
    Expand { path: String, detail: String },

    /// TOML deserialization failed
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },
}

fn read_expanded(path: &Path) -> Result<String, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;

    expand_env(&raw).map_err(|detail| LoadError::Expand {
        path: path.display().to_string(),
        detail,
    })
}

impl UserConfig {
    /// Load a user config from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes. Cross-reference validation is the assembler's job.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let expanded = read_expanded(path)?;
        toml::from_str(&expanded).map_err(|source| LoadError::Parse {
            path: path.display().to_string(),
            source: Box::new(source),
        })
    }
}

impl SystemConfig {
    /// Load a system config from a TOML file, merged over the built-ins
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let expanded = read_expanded(path)?;
        let user_supplied: Self =
            toml::from_str(&expanded).map_err(|source| LoadError::Parse {
                path: path.display().to_string(),
                source: Box::new(source),
            })?;
        Ok(user_supplied.merged_over_builtin())
    }

    /// Load from an optional path; absent means built-ins only
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, LoadError> {
        path.map_or_else(|| Ok(Self::builtin()), Self::load)
    }
}
