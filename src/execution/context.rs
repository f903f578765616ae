//! Execution context - owns the worker pool and memory accounting for queries

use super::config::EngineConfig;
use super::memory::{MemoryPool, SharedMemoryPool};
use super::worker_pool::WorkerPool;
use crate::error::Result;
use std::sync::Arc;

/// Execution context shared by every sequence a query dispatches
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    config: EngineConfig,
    pool: Arc<WorkerPool>,
    memory: SharedMemoryPool,
}

impl ExecutionContext {
    /// Context with the default configuration
    pub fn try_default() -> Result<Self> {
        Self::try_new(EngineConfig::default())
    }

    pub fn try_new(config: EngineConfig) -> Result<Self> {
        let config = config.normalized();
        let pool = WorkerPool::try_new(config.worker_count, config.queue_capacity)?;
        Ok(Self {
            memory: Arc::new(MemoryPool::new(config.memory_limit)),
            pool: Arc::new(pool),
            config,
        })
    }

    /// Set the number of worker threads (restarts the pool)
    pub fn with_worker_count(self, workers: usize) -> Result<Self> {
        let mut config = self.config;
        config.worker_count = workers.max(1);
        Self::try_new(config)
    }

    /// Set the task queue capacity (restarts the pool)
    pub fn with_queue_capacity(self, capacity: usize) -> Result<Self> {
        let mut config = self.config;
        config.queue_capacity = capacity.max(1);
        Self::try_new(config)
    }

    /// Set the maximum number of rows per page frame
    pub fn with_frame_rows(mut self, rows: usize) -> Self {
        self.config.frame_rows = rows.max(1);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn memory_pool(&self) -> &SharedMemoryPool {
        &self.memory
    }

    /// Workers plus the dispatching thread, which may reduce frames inline
    pub fn reducer_slots(&self) -> usize {
        self.pool.worker_count() + 1
    }
}
