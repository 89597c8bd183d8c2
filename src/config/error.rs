use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("unable to resolve path: {0}")]
    PathNotFound(String),

    #[error("invalid handler registered for '{name}': {reason}")]
    InvalidHandler { name: String, reason: String },

    #[error("unable to use '{operation}' on '{operand}': {reason}")]
    InvalidOperand {
        operation: String,
        operand: String,
        reason: String,
    },

    #[error("handler '{operation}' failed: {message}")]
    Handler { operation: String, message: String },

    #[error("recursion limit exceeded while resolving '{key}' (circular reference?)")]
    RecursionLimit { key: String },

    #[error("result of '{operation}' cannot be embedded in a structured value")]
    Unrepresentable { operation: String },

    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("no reader registered for extension '{extension}' ({path})")]
    UnsupportedExtension { extension: String, path: PathBuf },

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    JsonParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    IniParse {
        path: PathBuf,
        source: ini::ParseError,
    },

    #[cfg(feature = "yaml")]
    #[error("failed to parse config file '{path}': {source}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to walk config directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to deserialize config value: {0}")]
    DeserializeError(#[source] serde_json::Error),
}

impl ConfigError {
    /// Builds the error a custom handler returns for its own failures.
    pub fn handler(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Handler {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound(_))
    }
}
