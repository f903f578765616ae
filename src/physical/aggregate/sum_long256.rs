//! `sum(long256)` as a vector aggregate

use super::cell::PartialAggregationCell;
use super::keyed_store::{GroupKey, KeyedStore, ValueSchema, ValueType};
use crate::physical::page_frame::WideColumn;
use crate::types::WideInt256;

/// Aggregate evaluated over whole page frames, keyed or not
///
/// Before execution the planner calls [`push_value_types`] once; afterwards
/// the function is shared read-only by all workers and only mutates its
/// internally synchronized scalar state.
///
/// [`push_value_types`]: VectorAggregateFunction::push_value_types
pub trait VectorAggregateFunction: Send + Sync + 'static {
    /// Input column in the scanned frames
    fn column_index(&self) -> usize;

    /// First slot of this function in a keyed store's value region
    fn value_offset(&self) -> usize;

    /// Reserve value slots; returns the starting offset
    fn push_value_types(&mut self, schema: &mut ValueSchema) -> usize;

    /// Non-keyed path: fold a frame into the shared scalar state
    fn aggregate(&self, values: &WideColumn<'_>, worker_id: usize);

    /// Keyed path; `values` is `None` when the frame has no value column and
    /// only the keys should be registered
    fn aggregate_keyed(
        &self,
        store: &mut dyn KeyedStore,
        keys: &[GroupKey],
        values: Option<&WideColumn<'_>>,
        worker_id: usize,
    );

    /// Set the starting values of this function's slots
    fn init_store(&self, store: &mut dyn KeyedStore);

    fn merge(&self, into: &mut dyn KeyedStore, from: &dyn KeyedStore);

    /// Reconcile scalar state gathered outside the keyed path
    fn wrap_up(&self, store: &mut dyn KeyedStore);

    /// Reset scalar state before the function is reused
    fn clear(&self);

    /// Non-keyed result, NULL when no non-null rows were seen
    fn result(&self) -> WideInt256;

    /// Result for one group of a keyed store
    fn group_result(&self, slots: &[WideInt256]) -> WideInt256;
}

#[derive(Debug)]
pub struct SumLong256 {
    column_index: usize,
    value_offset: usize,
    cell: PartialAggregationCell,
}

impl SumLong256 {
    pub fn new(column_index: usize) -> Self {
        Self {
            column_index,
            value_offset: 0,
            cell: PartialAggregationCell::new(),
        }
    }

    /// Shared scalar state
    pub fn cell(&self) -> &PartialAggregationCell {
        &self.cell
    }
}

impl VectorAggregateFunction for SumLong256 {
    fn column_index(&self) -> usize {
        self.column_index
    }

    fn value_offset(&self) -> usize {
        self.value_offset
    }

    fn push_value_types(&mut self, schema: &mut ValueSchema) -> usize {
        // sum, then count of non-null values
        self.value_offset = schema.push(ValueType::Long256);
        schema.push(ValueType::Long);
        self.value_offset
    }

    fn aggregate(&self, values: &WideColumn<'_>, _worker_id: usize) {
        self.cell.accumulate(values);
    }

    fn aggregate_keyed(
        &self,
        store: &mut dyn KeyedStore,
        keys: &[GroupKey],
        values: Option<&WideColumn<'_>>,
        _worker_id: usize,
    ) {
        match values {
            Some(values) => store.add_wide(keys, values, self.value_offset),
            None => store.register_distinct_keys(keys),
        }
    }

    fn init_store(&self, store: &mut dyn KeyedStore) {
        store.set_initial_slot(self.value_offset, WideInt256::ZERO);
        store.set_initial_slot(self.value_offset + 1, WideInt256::ZERO);
    }

    fn merge(&self, into: &mut dyn KeyedStore, from: &dyn KeyedStore) {
        into.merge_sums(from, self.value_offset);
    }

    fn wrap_up(&self, store: &mut dyn KeyedStore) {
        store.wrap_up_sums(self.value_offset, self.cell.sum(), self.cell.row_count());
    }

    fn clear(&self) {
        self.cell.clear();
    }

    fn result(&self) -> WideInt256 {
        self.cell.result()
    }

    fn group_result(&self, slots: &[WideInt256]) -> WideInt256 {
        if slots[self.value_offset + 1].l0() == 0 {
            WideInt256::NULL
        } else {
            slots[self.value_offset]
        }
    }
}
