//! Parallel filtered scan
//!
//! Workers evaluate the predicate over whole page frames and record matching
//! row indices; the cursor streams them back in source order (or reversed for
//! descending scans).

use super::page_frame::{FrameRecord, PageFrame, PageFrameSource, ScanOrder};
use super::reduce_task::{PageFrameReduceTask, RowList};
use super::sequence::{PageFrameReducer, PageFrameSequence};
use crate::error::Result;
use crate::execution::ExecutionContext;
use arrow::array::{RecordBatch, UInt64Array};
use arrow::compute::take_record_batch;
use std::sync::Arc;

/// Row predicate evaluated by workers
pub trait FramePredicate: Send + Sync + 'static {
    fn matches(&self, record: &FrameRecord<'_>) -> Result<bool>;
}

impl<F> FramePredicate for F
where
    F: Fn(&FrameRecord<'_>) -> Result<bool> + Send + Sync + 'static,
{
    fn matches(&self, record: &FrameRecord<'_>) -> Result<bool> {
        self(record)
    }
}

/// Reducer that keeps the rows matching a predicate
#[derive(Debug)]
pub struct FilterAtom<P> {
    predicate: P,
}

impl<P: FramePredicate> FilterAtom<P> {
    pub fn new(predicate: P) -> Self {
        Self { predicate }
    }
}

impl<P: FramePredicate> PageFrameReducer for FilterAtom<P> {
    fn reduce(&self, _worker_id: usize, frame: &PageFrame, rows: &mut RowList) -> Result<()> {
        rows.clear();
        for r in 0..frame.row_count() {
            if self.predicate.matches(&frame.record(r))? {
                rows.push(r as u64)?;
            }
        }
        Ok(())
    }
}

/// Position of a matching row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowId {
    pub frame_index: usize,
    /// Row within the frame
    pub row: u64,
    /// Row within the table
    pub row_id: u64,
}

/// Builds cursors that filter `source` in parallel
pub struct AsyncFilteredCursorFactory<P: FramePredicate> {
    source: Arc<dyn PageFrameSource>,
    atom: Arc<FilterAtom<P>>,
}

impl<P: FramePredicate> AsyncFilteredCursorFactory<P> {
    pub fn new(source: Arc<dyn PageFrameSource>, predicate: P) -> Self {
        Self {
            source,
            atom: Arc::new(FilterAtom::new(predicate)),
        }
    }

    pub fn has_descending_order(&self) -> bool {
        self.source.has_descending_order()
    }

    /// Dispatch a fresh scan
    pub fn execute(&self, ctx: &ExecutionContext) -> Result<PageFrameSequence<FilterAtom<P>>> {
        PageFrameSequence::dispatch(self.source.as_ref(), ctx, Arc::clone(&self.atom))
    }

    pub fn get_cursor(&self, ctx: &ExecutionContext) -> Result<AsyncFilteredCursor<P>> {
        Ok(AsyncFilteredCursor::new(self.execute(ctx)?))
    }
}

/// Pull interface over the matching rows of a dispatched scan
#[derive(Debug)]
pub struct AsyncFilteredCursor<P: FramePredicate> {
    sequence: PageFrameSequence<FilterAtom<P>>,
    current: Option<PageFrameReduceTask>,
    /// Rows of `current` already returned
    consumed: usize,
}

impl<P: FramePredicate> AsyncFilteredCursor<P> {
    pub fn new(sequence: PageFrameSequence<FilterAtom<P>>) -> Self {
        Self {
            sequence,
            current: None,
            consumed: 0,
        }
    }

    fn descending(&self) -> bool {
        self.sequence.order() == ScanOrder::Descending
    }

    /// Make sure `current` has unread rows, pulling frames as needed
    fn fill(&mut self) -> Result<bool> {
        loop {
            if let Some(task) = &self.current {
                if self.consumed < task.rows().len() {
                    return Ok(true);
                }
            }
            self.current = None;
            self.consumed = 0;
            match self.sequence.next()? {
                Some(task) => self.current = Some(task),
                None => return Ok(false),
            }
        }
    }

    pub fn next_row(&mut self) -> Result<Option<RowId>> {
        if !self.fill()? {
            return Ok(None);
        }
        let descending = self.descending();
        let Some(task) = &self.current else {
            return Ok(None);
        };
        let rows = task.rows().as_slice();
        let row = if descending {
            rows[rows.len() - 1 - self.consumed]
        } else {
            rows[self.consumed]
        };
        self.consumed += 1;
        Ok(Some(RowId {
            frame_index: task.frame_index(),
            row,
            row_id: task.frame().first_row() + row,
        }))
    }

    /// Remaining matching rows of the next frame that has any, as a batch
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if !self.fill()? {
            return Ok(None);
        }
        let descending = self.descending();
        let Some(task) = self.current.take() else {
            return Ok(None);
        };
        let rows = task.rows().as_slice();
        let remaining = rows.len() - self.consumed;
        let indices: UInt64Array = if descending {
            rows[..remaining].iter().rev().copied().collect()
        } else {
            rows[self.consumed..].iter().copied().collect()
        };
        self.consumed = 0;
        let batch = take_record_batch(task.frame().batch(), &indices)?;
        Ok(Some(batch))
    }

    /// Table row ids of every remaining match
    pub fn collect_row_ids(&mut self) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        while let Some(row) = self.next_row()? {
            out.push(row.row_id);
        }
        Ok(out)
    }

    pub fn close(&mut self) {
        self.current = None;
        self.sequence.close();
    }
}
