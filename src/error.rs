//! Error types shared by graph construction, conversion and scoring.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeepLiftError {
    /// The layer graph is malformed: cyclic, dangling references, or
    /// incompatible layer shapes.
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Missing input batch for graph input '{0}'")]
    MissingInput(String),

    #[error("Shape mismatch for {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Unsupported node kind: {0}")]
    UnsupportedNodeKind(String),

    #[error("Unsupported schema version: {0}")]
    UnsupportedSchemaVersion(String),

    #[error("Task index {task_index} out of range for target '{target}' with {features} features")]
    InvalidTask {
        target: String,
        task_index: usize,
        features: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to deserialize network description: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Scoring cancelled after {completed_chunks} chunk(s)")]
    Cancelled { completed_chunks: usize },
}

impl DeepLiftError {
    pub(crate) fn shape_mismatch(
        context: impl Into<String>,
        expected: &[usize],
        got: &[usize],
    ) -> Self {
        DeepLiftError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeepLiftError>;
