//! Parallel vector aggregation
//!
//! Functions are evaluated over whole page frames. Non-keyed results are
//! merged into a spin-locked cell shared by all workers; keyed results are
//! accumulated into per-worker stores and merged at the end.

pub mod cell;
mod exec;
pub mod keyed_store;
mod sum_long256;

pub use cell::{reduce_frame, FrameAggregate, PartialAggregationCell};
pub use exec::*;
pub use keyed_store::{
    GroupKey, HashKeyedStore, KeyKind, KeyedStore, ValueSchema, ValueType, NULL_KEY,
};
pub use sum_long256::*;
