//! Query execution module

mod config;
mod context;
mod memory;
mod worker_pool;

pub use config::*;
pub use context::*;
pub use memory::*;
pub use worker_pool::*;
