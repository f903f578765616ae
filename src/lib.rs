//! Parallel page-frame execution core
//!
//! Scans columnar page frames on a fixed worker pool, filters them, and
//! aggregates 256-bit integer columns with or without grouping.

pub mod datagen;
pub mod error;
pub mod execution;
pub mod physical;
pub mod types;

// Re-export main types
pub use error::{QueryError, Result};
pub use execution::{EngineConfig, ExecutionContext};
pub use physical::{
    AsyncFilteredCursorFactory, MemoryPageFrameSource, PageFrame, PageFrameSequence,
    PageFrameSource, VectorAggregateExec,
};
pub use types::WideInt256;
