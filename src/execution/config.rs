//! Engine configuration

use serde::Deserialize;

/// Default number of rows per page frame
pub const DEFAULT_FRAME_ROWS: usize = 8192; // fits L2 cache for a 32-byte column

/// Default capacity of the worker pool's task queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Tunables for parallel scans
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads (defaults to CPU count)
    pub worker_count: usize,
    /// Bounded task queue size; a full queue makes the dispatcher reduce inline
    pub queue_capacity: usize,
    /// Upper bound on rows per page frame for in-memory sources
    pub frame_rows: usize,
    /// Limit for row-index buffers, in bytes
    pub memory_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: rayon::current_num_threads(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            frame_rows: DEFAULT_FRAME_ROWS,
            memory_limit: usize::MAX,
        }
    }
}

impl EngineConfig {
    /// Clamp zero values that would stall the pool
    pub fn normalized(mut self) -> Self {
        self.worker_count = self.worker_count.max(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.frame_rows = self.frame_rows.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"worker_count": 3, "frame_rows": 0}"#).unwrap();
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);

        let config = config.normalized();
        assert_eq!(config.frame_rows, 1);
        assert_eq!(config.memory_limit, usize::MAX);
    }
}
