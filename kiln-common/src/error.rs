// kiln-common/src/error.rs
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum KilnError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Formula Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("DownloadError: Failed to download '{0}' from '{1}': {2}")]
    DownloadError(String, String, String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Invalid formula '{0}': {1}")]
    InvalidFormula(String, String),

    #[error("Generic Error: {0}")]
    Generic(String),

    #[error("HttpError: {0}")]
    HttpError(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("IoError: {0}")]
    IoError(String),

    #[error("Archive Error: {0}")]
    ArchiveError(String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Unknown option '{option}' for formula '{formula}'")]
    UnknownOption { formula: String, option: String },

    #[error("Conflicting options for formula '{formula}': {detail}")]
    OptionConflict { formula: String, detail: String },

    #[error("Missing required dependencies for '{formula}': {}", .missing.join(", "))]
    MissingRequiredDependency {
        formula: String,
        missing: Vec<String>,
    },

    #[error("Checksum mismatch for {artifact}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to apply patch '{patch}': {reason}")]
    PatchApplyFailure { patch: String, reason: String },

    #[error("Build step '{step}' failed with {}", describe_exit(.code))]
    BuildStepFailed { step: String, code: Option<i32> },

    #[error("Smoke test failed: {0}")]
    SmokeTestFailed(String),

    #[error("Cannot install {formula}: conflicting package '{name}' is installed ({reason})")]
    ConflictingPackageInstalled {
        formula: String,
        name: String,
        reason: String,
    },

    #[error("{0} {1} is already installed (use --force to reinstall)")]
    AlreadyInstalled(String, String),
}

/// Renders a process exit code the way build failures report it.
pub fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit status {c}"),
        None => "termination by signal".to_string(),
    }
}

impl From<std::io::Error> for KilnError {
    fn from(err: std::io::Error) -> Self {
        KilnError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for KilnError {
    fn from(err: reqwest::Error) -> Self {
        KilnError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for KilnError {
    fn from(err: toml::de::Error) -> Self {
        KilnError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;
