//! Physical execution module
//!
//! Page frames are handed to a worker pool, reduced in parallel and handed
//! back in scan order. Filters and aggregations are built on that sequence.

pub mod aggregate;
pub mod filter;
pub mod kernels;
mod page_frame;
mod reduce_task;
mod sequence;

pub use aggregate::{
    AggregateOutput, GroupBy, SumLong256, VectorAggregateExec, VectorAggregateFunction,
};
pub use filter::*;
pub use kernels::{long256_add, long256_sub};
pub use page_frame::*;
pub use reduce_task::*;
pub use sequence::*;
