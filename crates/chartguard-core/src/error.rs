//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid config schema: {message}")]
    InvalidSchema { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single schema validation failure, located by JSON pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaErrorInfo {
    /// JSON pointer into the validated document (`(root)` for the document itself)
    pub path: String,

    /// Human-readable message
    pub message: String,
}

impl std::fmt::Display for SchemaErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
