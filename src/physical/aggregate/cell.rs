//! Shared non-keyed aggregation cell
//!
//! Workers reduce a frame to one local value without synchronization, then
//! merge it into the shared sum under a test-and-set spin flag. The critical
//! section is a single 256-bit add, so contention stays short.

use crate::physical::page_frame::WideColumn;
use crate::types::WideInt256;
use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sum and row count of the non-null values of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAggregate {
    pub sum: WideInt256,
    pub rows: u64,
}

/// Reduce one frame; `None` when nothing should be merged
///
/// NULL rows are skipped. A frame with no non-null rows, or whose total lands
/// exactly on the NULL bit pattern, contributes nothing.
pub fn reduce_frame<I>(values: I) -> Option<FrameAggregate>
where
    I: IntoIterator<Item = WideInt256>,
{
    let mut sum = WideInt256::ZERO;
    let mut rows = 0u64;
    for value in values {
        if value.is_null() {
            continue;
        }
        sum = sum.wrapping_add(&value);
        rows += 1;
    }
    if rows == 0 || sum.is_null() {
        return None;
    }
    Some(FrameAggregate { sum, rows })
}

#[derive(Debug, Default)]
pub struct PartialAggregationCell {
    lock: AtomicBool,
    /// Limbs of the running sum; only touched while `lock` is held
    sum: [AtomicU64; 4],
    row_count: AtomicU64,
}

/// Releases the spin flag on drop
struct SpinGuard<'a> {
    lock: &'a AtomicBool,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl PartialAggregationCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) -> SpinGuard<'_> {
        let backoff = Backoff::new();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.spin();
        }
        SpinGuard { lock: &self.lock }
    }

    fn load_sum(&self) -> WideInt256 {
        WideInt256::new(
            self.sum[0].load(Ordering::Relaxed),
            self.sum[1].load(Ordering::Relaxed),
            self.sum[2].load(Ordering::Relaxed),
            self.sum[3].load(Ordering::Relaxed),
        )
    }

    fn store_sum(&self, value: WideInt256) {
        for (slot, limb) in self.sum.iter().zip(value.limbs()) {
            slot.store(limb, Ordering::Relaxed);
        }
    }

    /// Reduce a frame locally and merge it into the shared state
    pub fn accumulate(&self, values: &WideColumn<'_>) {
        if let Some(local) = reduce_frame(values.iter()) {
            self.merge(local);
        }
    }

    /// Merge a frame-local aggregate under the spin flag
    pub fn merge(&self, local: FrameAggregate) {
        debug_assert!(!local.sum.is_null());
        let _guard = self.acquire();
        let sum = self.load_sum().wrapping_add(&local.sum);
        self.store_sum(sum);
        self.row_count.fetch_add(local.rows, Ordering::Relaxed);
    }

    /// Running sum, NULL when no non-null row has been merged
    pub fn result(&self) -> WideInt256 {
        let _guard = self.acquire();
        if self.row_count.load(Ordering::Relaxed) == 0 {
            return WideInt256::NULL;
        }
        self.load_sum()
    }

    /// Raw running sum, zero when empty
    pub fn sum(&self) -> WideInt256 {
        let _guard = self.acquire();
        self.load_sum()
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Acquire)
    }

    /// Reset for reuse by another query
    pub fn clear(&self) {
        let _guard = self.acquire();
        self.store_sum(WideInt256::ZERO);
        self.row_count.store(0, Ordering::Relaxed);
    }
}
