use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GroundGenError {
    // --- I/O ---
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // --- Config ---
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("More than one graph policy selected: {0:?}")]
    ConflictingGraphPolicies(Vec<&'static str>),

    // --- Data ---
    #[error("Empty {what} sequence")]
    EmptySequence { what: &'static str },

    #[error("Edge ({src} -> {dst}) out of range for {num_nodes} nodes")]
    EdgeOutOfRange {
        src: usize,
        dst: usize,
        num_nodes: usize,
    },

    #[error("Vocabulary has {got} entries but the model expects {expected}")]
    VocabSizeMismatch { expected: usize, got: usize },

    #[error("Edge label {label} out of range for {num_labels} label slots")]
    LabelOutOfRange { label: usize, num_labels: usize },

    #[error("Empty batch")]
    EmptyBatch,

    // --- Model ---
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Checkpoint save failed: {0}")]
    CheckpointSave(String),

    #[error("Checkpoint load failed: {0}")]
    CheckpointLoad(String),

    // --- Training ---
    #[error("Loss is not finite at step {step}: {value}")]
    NonFiniteLoss { step: usize, value: f32 },

    #[error("Gradient norm is not finite at step {step}: {norm}")]
    NonFiniteGradient { step: usize, norm: f32 },
}

impl GroundGenError {
    pub fn config(msg: impl Into<String>) -> Self {
        GroundGenError::InvalidConfig(msg.into())
    }

    /// True for the errors that mean "this batch was skipped, keep training".
    pub fn is_skipped_update(&self) -> bool {
        matches!(
            self,
            GroundGenError::NonFiniteLoss { .. } | GroundGenError::NonFiniteGradient { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GroundGenError>;
