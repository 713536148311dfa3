use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the iudex engine.
///
/// Only validation, configuration, corpus and deadline failures surface to
/// callers. Per-strategy and optional-subsystem failures are absorbed inside
/// the pipeline: the affected source is dropped or its signal zeroed, and the
/// request continues with the same response shape.
#[derive(Error, Debug)]
pub enum IudexError {
    /// Rejected request input (bad filter values, pagination out of range)
    #[error("Invalid request: {field}: {message}")]
    Validation { field: String, message: String },

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationIssue> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Primary text index or decision store unreachable. Retryable: the
    /// request may succeed once the corpus backend is back.
    #[error("Corpus unavailable ({subsystem}): {message}")]
    CorpusUnavailable {
        subsystem: &'static str,
        message: String,
    },

    /// Per-request deadline exceeded before any source completed
    #[error("Search deadline exceeded after {elapsed_ms}ms with no completed source")]
    Timeout { elapsed_ms: u64 },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IudexError {
    /// True for failures worth retrying unchanged (corpus backends down,
    /// request deadline elapsed).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IudexError::CorpusUnavailable { .. } | IudexError::Timeout { .. }
        )
    }

    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        IudexError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn corpus(subsystem: &'static str, message: impl Into<String>) -> Self {
        IudexError::CorpusUnavailable {
            subsystem,
            message: message.into(),
        }
    }
}

/// Configuration validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for iudex operations
pub type Result<T> = std::result::Result<T, IudexError>;
