//! Error types for scanvox

use thiserror::Error;

/// Errors that can occur during inference, persistence, or configuration
#[derive(Debug, Error)]
pub enum EngageError {
    #[error("Model not built or loaded")]
    ModelNotBuilt,

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid session batch: {0}")]
    Validation(#[from] crate::schema::ValidationError),
}

impl EngageError {
    /// Build a shape mismatch error for the named stage
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl Into<Vec<usize>>,
        actual: impl Into<Vec<usize>>,
    ) -> Self {
        EngageError::ShapeMismatch {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Build a model load error, keeping the offending path
    pub fn model_load(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        EngageError::ModelLoad {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}
