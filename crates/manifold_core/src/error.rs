//! Error types for the engine.

use std::path::PathBuf;

use manifold_templates::TemplateError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort a run.
///
/// Schema validation failures are not errors: they are counted per item and
/// the run continues.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Execution not enabled: refusing to run `{0}`")]
    ExecDisabled(String),

    #[error("Command `{command}` failed with {status}")]
    ExecFailed { command: String, status: String },

    #[error("Unsupported output extension for {0}: payload is not a string")]
    UnsupportedExtension(String),

    #[error("Unsupported archive type: {0}")]
    UnsupportedArchive(PathBuf),

    #[error("Directive combines conflicting actions: {}", .0.join(", "))]
    ConflictingDirective(Vec<String>),

    #[error("Incomplete directive: {0}")]
    IncompleteDirective(String),

    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("Expansion too deep ({depth} levels) at {template}")]
    ExpansionTooDeep { depth: usize, template: PathBuf },

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid replacement pattern '{pattern}': {message}")]
    InvalidReplace { pattern: String, message: String },

    #[error("File operation failed: {0}")]
    FileOps(#[from] fs_extra::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
