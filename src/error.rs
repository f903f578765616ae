//! Error types for the scan core

use thiserror::Error;

/// Result type alias for scan core operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Main error type for the scan core
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resources exhausted: {0}")]
    ResourcesExhausted(String),

    #[error("Worker {worker_id} panicked while reducing frame {frame_index}: {message}")]
    WorkerPanicked {
        worker_id: usize,
        frame_index: usize,
        message: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
