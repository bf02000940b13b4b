//! Structured error types for carve
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Pattern specification has no depths")]
    EmptySpecification,

    #[error("Depth {0} has no rules")]
    DepthWithoutRules(usize),

    #[error("Unusable thread scope and no focus thread to fall back to")]
    NoFallbackTid,

    #[error("Invalid thread id list {list:?}: {reason}")]
    InvalidTidList { list: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to parse trace file: {0}")]
    TraceParseFailed(String),

    #[error("Trace contains no usable events")]
    EmptyTrace,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize trace data: {0}")]
    SerializationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
