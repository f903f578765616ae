//! Reduce task - one page frame's unit of work plus its output buffer

use super::page_frame::PageFrame;
use crate::error::{QueryError, Result};
use crate::execution::MemoryReservation;
use std::mem::size_of;

const MIN_ROW_CAPACITY: usize = 16;

/// Growable list of matching row indices, accounted against a memory pool
#[derive(Debug)]
pub struct RowList {
    rows: Vec<u64>,
    /// Slots paid for in the reservation
    capacity: usize,
    reservation: MemoryReservation,
}

impl RowList {
    pub fn new(reservation: MemoryReservation) -> Self {
        Self {
            rows: Vec::new(),
            capacity: 0,
            reservation,
        }
    }

    /// Append a row index, growing capacity on demand
    #[inline]
    pub fn push(&mut self, row: u64) -> Result<()> {
        if self.rows.len() == self.capacity {
            self.grow()?;
        }
        self.rows.push(row);
        Ok(())
    }

    fn grow(&mut self) -> Result<()> {
        let current = self.capacity;
        let target = (current * 2).max(MIN_ROW_CAPACITY);
        self.reservation
            .try_grow((target - current) * size_of::<u64>())?;
        self.rows.reserve_exact(target - self.rows.len());
        self.capacity = target;
        Ok(())
    }

    /// Forget the rows but keep the buffer for the next frame
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Capacity the reservation has been grown to
    pub fn reserved_bytes(&self) -> usize {
        self.reservation.size()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.rows
    }

    /// Release the buffer and its reservation
    pub fn free(&mut self) {
        self.rows = Vec::new();
        self.capacity = 0;
        self.reservation.free();
    }
}

/// A page frame, its output rows and the outcome of reducing it
#[derive(Debug)]
pub struct PageFrameReduceTask {
    frame: PageFrame,
    rows: RowList,
    error: Option<QueryError>,
    worker_id: Option<usize>,
    skipped: bool,
}

impl PageFrameReduceTask {
    pub fn new(frame: PageFrame, rows: RowList) -> Self {
        Self {
            frame,
            rows,
            error: None,
            worker_id: None,
            skipped: false,
        }
    }

    pub fn frame(&self) -> &PageFrame {
        &self.frame
    }

    pub fn frame_index(&self) -> usize {
        self.frame.index()
    }

    pub fn frame_row_count(&self) -> usize {
        self.frame.row_count()
    }

    pub fn rows(&self) -> &RowList {
        &self.rows
    }

    /// Frame and output buffer, borrowed together for a reducer
    pub fn parts_mut(&mut self) -> (&PageFrame, &mut RowList) {
        (&self.frame, &mut self.rows)
    }

    /// Id of the worker that reduced this frame
    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    /// True when cancellation stopped the frame from being reduced
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn mark_reduced(&mut self, worker_id: usize) {
        self.worker_id = Some(worker_id);
    }

    pub(crate) fn mark_skipped(&mut self) {
        self.skipped = true;
        self.rows.free();
    }

    pub(crate) fn fail(&mut self, error: QueryError) {
        self.error = Some(error);
    }

    pub(crate) fn take_error(&mut self) -> Option<QueryError> {
        self.error.take()
    }
}
