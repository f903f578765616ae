//! Vector aggregate execution
//!
//! Non-keyed: every worker folds its frames into the function's shared cell.
//! Keyed: every reducer slot (each worker plus the dispatching thread) owns a
//! store, so the hot path takes no shared lock; the stores are merged pairwise
//! once all frames are done.

use super::keyed_store::{GroupKey, HashKeyedStore, KeyKind, KeyedStore, ValueSchema, NULL_KEY};
use super::sum_long256::VectorAggregateFunction;
use crate::error::{QueryError, Result};
use crate::execution::ExecutionContext;
use crate::physical::page_frame::{PageFrame, PageFrameSource};
use crate::physical::reduce_task::RowList;
use crate::physical::sequence::{PageFrameReducer, PageFrameSequence};
use crate::types::{wide_int_array, WideInt256};
use arrow::array::{Array, ArrayRef, Int64Array, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Group-by column and how its values become keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBy {
    pub column: usize,
    pub kind: KeyKind,
}

/// Outcome of an aggregation
#[derive(Debug)]
pub enum AggregateOutput {
    Scalar(WideInt256),
    Grouped(RecordBatch),
}

impl AggregateOutput {
    pub fn scalar(&self) -> Option<WideInt256> {
        match self {
            AggregateOutput::Scalar(v) => Some(*v),
            AggregateOutput::Grouped(_) => None,
        }
    }

    /// Result as a record batch (`sum`, or `key` + `sum`)
    pub fn into_batch(self) -> Result<RecordBatch> {
        match self {
            AggregateOutput::Grouped(batch) => Ok(batch),
            AggregateOutput::Scalar(v) => {
                let schema = Arc::new(Schema::new(vec![Field::new(
                    "sum",
                    WideInt256::data_type(),
                    true,
                )]));
                let sum: ArrayRef = Arc::new(wide_int_array([v])?);
                Ok(RecordBatch::try_new(schema, vec![sum])?)
            }
        }
    }
}

/// Non-keyed atom
struct ScalarAggregateAtom<F> {
    function: Arc<F>,
}

impl<F: VectorAggregateFunction> PageFrameReducer for ScalarAggregateAtom<F> {
    fn reduce(&self, worker_id: usize, frame: &PageFrame, _rows: &mut RowList) -> Result<()> {
        let values = frame.wide_column(self.function.column_index())?;
        self.function.aggregate(&values, worker_id);
        Ok(())
    }
}

/// Keyed atom with one store per reducer slot
struct KeyedAggregateAtom<F> {
    function: Arc<F>,
    group_by: GroupBy,
    stores: Vec<Mutex<HashKeyedStore>>,
}

impl<F: VectorAggregateFunction> PageFrameReducer for KeyedAggregateAtom<F> {
    fn reduce(&self, worker_id: usize, frame: &PageFrame, _rows: &mut RowList) -> Result<()> {
        let value_column = self.function.column_index();

        if frame.is_column_absent(self.group_by.column)? {
            // every row falls in the NULL group; wrap-up moves it there
            let values = frame.wide_column(value_column)?;
            self.function.aggregate(&values, worker_id);
            return Ok(());
        }

        let keys = frame_keys(frame, self.group_by)?;
        let store = self.stores.get(worker_id).ok_or_else(|| {
            QueryError::Internal(format!("no keyed store for worker {}", worker_id))
        })?;
        // each slot is only ever locked by its own worker
        let mut store = store.lock();

        if frame.is_column_absent(value_column)? {
            self.function
                .aggregate_keyed(&mut *store, &keys, None, worker_id);
        } else {
            let values = frame.wide_column(value_column)?;
            self.function
                .aggregate_keyed(&mut *store, &keys, Some(&values), worker_id);
        }
        Ok(())
    }
}

/// Group keys of every row in the frame
fn frame_keys(frame: &PageFrame, group_by: GroupBy) -> Result<Vec<GroupKey>> {
    let column = frame.column(group_by.column)?;
    let column = match column.data_type() {
        DataType::Int64 => Arc::clone(column),
        DataType::Int32 | DataType::Int16 | DataType::Int8 => {
            cast(column.as_ref(), &DataType::Int64)?
        }
        DataType::Timestamp(unit, tz) => {
            // hour keys are computed from microseconds
            let column = if group_by.kind == KeyKind::Hour && *unit != TimeUnit::Microsecond {
                cast(
                    column.as_ref(),
                    &DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
                )?
            } else {
                Arc::clone(column)
            };
            cast(column.as_ref(), &DataType::Int64)?
        }
        other => {
            return Err(QueryError::Type(format!(
                "cannot group by column of type {:?}",
                other
            )))
        }
    };
    let values = column
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| QueryError::Internal("key column failed to cast".to_string()))?;
    Ok(values
        .iter()
        .map(|v| group_by.kind.key_of(v))
        .collect())
}

/// Parallel `sum`-style aggregation over a page frame source
pub struct VectorAggregateExec<F: VectorAggregateFunction> {
    source: Arc<dyn PageFrameSource>,
    group_by: Option<GroupBy>,
    function: Arc<F>,
    schema: ValueSchema,
}

impl<F: VectorAggregateFunction> std::fmt::Debug for VectorAggregateExec<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorAggregateExec")
            .field("group_by", &self.group_by)
            .field("value_column", &self.function.column_index())
            .field("value_slots", &self.schema.len())
            .finish()
    }
}

impl<F: VectorAggregateFunction> VectorAggregateExec<F> {
    /// Plan an aggregation; fixes the function's slot offset for the plan's lifetime
    pub fn new(
        source: Arc<dyn PageFrameSource>,
        mut function: F,
        group_by: Option<GroupBy>,
    ) -> Self {
        let mut schema = ValueSchema::new();
        function.push_value_types(&mut schema);
        Self {
            source,
            group_by,
            function: Arc::new(function),
            schema,
        }
    }

    pub fn function(&self) -> &Arc<F> {
        &self.function
    }

    /// Run the aggregation to completion
    ///
    /// The function's scalar state belongs to this plan, so a plan runs one
    /// execution at a time. Sharing it between threads needs a lock:
    ///
    /// ```compile_fail
    /// # use std::sync::Arc;
    /// # use wide_scan::execution::ExecutionContext;
    /// # use wide_scan::physical::{SumLong256, VectorAggregateExec};
    /// fn run(exec: Arc<VectorAggregateExec<SumLong256>>, ctx: &ExecutionContext) {
    ///     exec.execute(ctx).unwrap();
    /// }
    /// ```
    pub fn execute(&mut self, ctx: &ExecutionContext) -> Result<AggregateOutput> {
        self.function.clear();
        match self.group_by {
            None => self.execute_scalar(ctx),
            Some(group_by) => self.execute_keyed(ctx, group_by),
        }
    }

    fn execute_scalar(&self, ctx: &ExecutionContext) -> Result<AggregateOutput> {
        let start = Instant::now();
        let atom = Arc::new(ScalarAggregateAtom {
            function: Arc::clone(&self.function),
        });
        let mut sequence = PageFrameSequence::dispatch(self.source.as_ref(), ctx, atom)?;
        let frames = sequence.await_completion()?;

        let result = self.function.result();
        debug!(frames, elapsed = ?start.elapsed(), "scalar aggregation done");
        Ok(AggregateOutput::Scalar(result))
    }

    fn execute_keyed(&self, ctx: &ExecutionContext, group_by: GroupBy) -> Result<AggregateOutput> {
        let start = Instant::now();
        let stores = (0..ctx.reducer_slots())
            .map(|_| {
                let mut store = HashKeyedStore::new(&self.schema);
                self.function.init_store(&mut store);
                Mutex::new(store)
            })
            .collect();
        let atom = Arc::new(KeyedAggregateAtom {
            function: Arc::clone(&self.function),
            group_by,
            stores,
        });

        let mut sequence =
            PageFrameSequence::dispatch(self.source.as_ref(), ctx, Arc::clone(&atom))?;
        let frames = sequence.await_completion()?;
        drop(sequence);

        let stores: Vec<HashKeyedStore> = atom
            .stores
            .iter()
            .map(|slot| std::mem::replace(&mut *slot.lock(), HashKeyedStore::new(&self.schema)))
            .collect();

        let function = &self.function;
        let merged = stores
            .into_par_iter()
            .reduce_with(|mut into, from| {
                function.merge(&mut into, &from);
                into
            });
        let mut merged = match merged {
            Some(store) => store,
            None => {
                let mut store = HashKeyedStore::new(&self.schema);
                function.init_store(&mut store);
                store
            }
        };
        function.wrap_up(&mut merged);

        debug!(
            frames,
            groups = merged.len(),
            elapsed = ?start.elapsed(),
            "keyed aggregation done"
        );
        Ok(AggregateOutput::Grouped(self.build_output(&merged)?))
    }

    /// `key` (NULL key first) and `sum` columns
    fn build_output(&self, store: &dyn KeyedStore) -> Result<RecordBatch> {
        let mut groups: Vec<(GroupKey, WideInt256)> = store
            .groups()
            .map(|(key, slots)| (key, self.function.group_result(slots)))
            .collect();
        groups.sort_unstable_by_key(|(key, _)| *key);

        let keys: Int64Array = groups
            .iter()
            .map(|(key, _)| (*key != NULL_KEY).then_some(*key))
            .collect();
        let sums = wide_int_array(groups.iter().map(|(_, sum)| *sum))?;

        let schema = Arc::new(Schema::new(vec![
            Field::new("key", DataType::Int64, true),
            Field::new("sum", WideInt256::data_type(), true),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![Arc::new(keys), Arc::new(sums)],
        )?)
    }
}
