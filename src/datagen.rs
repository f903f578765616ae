//! Seeded in-memory data for the CLI, benches and tests
//!
//! Tables have three columns: `ts` (microsecond timestamp), `grp` (Int64 group
//! key) and `val` (long256).

use crate::error::Result;
use crate::types::{wide_int_array, WideInt256};
use arrow::array::{Int64Array, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use rand::prelude::*;
use std::sync::Arc;

pub const TS_COLUMN: usize = 0;
pub const GROUP_COLUMN: usize = 1;
pub const VALUE_COLUMN: usize = 2;

/// 2024-01-01T00:00:00Z
const START_MICROS: i64 = 1_704_067_200_000_000;
/// One row per 37 seconds spreads a few thousand rows over every hour of the day
const STEP_MICROS: i64 = 37_000_000;

pub fn wide_table_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("ts", DataType::Timestamp(TimeUnit::Microsecond, None), false),
        Field::new("grp", DataType::Int64, true),
        Field::new("val", WideInt256::data_type(), true),
    ]))
}

/// Wide table generator
pub struct WideTableGenerator {
    rng: StdRng,
    groups: i64,
    null_every: usize,
    batch_rows: usize,
}

impl WideTableGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            groups: 16,
            null_every: 0,
            batch_rows: 65_536,
        }
    }

    /// Number of distinct non-null group keys
    pub fn with_groups(mut self, groups: i64) -> Self {
        self.groups = groups.max(1);
        self
    }

    /// Every n-th value is NULL, and so is the key of every n-th row starting
    /// at row 0; 0 disables nulls
    pub fn with_null_every(mut self, null_every: usize) -> Self {
        self.null_every = null_every;
        self
    }

    pub fn with_batch_rows(mut self, batch_rows: usize) -> Self {
        self.batch_rows = batch_rows.max(1);
        self
    }

    fn value(&mut self) -> WideInt256 {
        let v = WideInt256::new(
            self.rng.gen(),
            self.rng.gen(),
            self.rng.gen_range(0..1 << 32),
            0,
        );
        if v.is_null() {
            WideInt256::ZERO
        } else {
            v
        }
    }

    fn is_null_value(&self, row: usize) -> bool {
        self.null_every > 0 && row % self.null_every == self.null_every - 1
    }

    fn is_null_key(&self, row: usize) -> bool {
        self.null_every > 0 && row % self.null_every == 0
    }

    /// Generate `rows` rows split into batches of at most `batch_rows`
    pub fn generate(&mut self, rows: usize) -> Result<Vec<RecordBatch>> {
        let schema = wide_table_schema();
        let mut batches = Vec::new();
        let mut start = 0;
        while start < rows {
            let end = (start + self.batch_rows).min(rows);
            let mut ts = Vec::with_capacity(end - start);
            let mut grp = Vec::with_capacity(end - start);
            let mut val = Vec::with_capacity(end - start);
            for row in start..end {
                ts.push(START_MICROS + row as i64 * STEP_MICROS);
                grp.push((!self.is_null_key(row)).then(|| self.rng.gen_range(0..self.groups)));
                val.push(if self.is_null_value(row) {
                    WideInt256::NULL
                } else {
                    self.value()
                });
            }
            batches.push(RecordBatch::try_new(
                Arc::clone(&schema),
                vec![
                    Arc::new(TimestampMicrosecondArray::from(ts)),
                    Arc::new(Int64Array::from(grp)),
                    Arc::new(wide_int_array(val)?),
                ],
            )?);
            start = end;
        }
        Ok(batches)
    }
}
