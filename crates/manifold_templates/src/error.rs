//! Error types for templates.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while loading, compiling or rendering templates.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(PathBuf),

    #[error("Manifest item must have a name (source: {source_name})")]
    MissingName { source_name: String },

    #[error("Template compilation failed for {template}: {message}")]
    CompilationFailed { template: PathBuf, message: String },

    #[error("Template rendering failed for {template}: {message}")]
    RenderingFailed { template: PathBuf, message: String },

    #[error("Invalid import block in {template}: {message}")]
    InvalidImport { template: PathBuf, message: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
