//! Page frame sequence - dispatches reduce tasks to the worker pool and
//! collects them back in the row order the consumer asked for
//!
//! Lifecycle: `Created -> Dispatching -> AllDispatched -> Collecting -> Done`,
//! with `Cancelled` reachable once dispatching has started. Workers may finish
//! frames in any order; completed tasks wait in a dense reorder buffer indexed
//! by frame until every earlier frame (in delivery order) has been handed out.

use super::page_frame::{PageFrame, PageFrameSource, ScanOrder};
use super::reduce_task::{PageFrameReduceTask, RowList};
use crate::error::{QueryError, Result};
use crate::execution::{ExecutionContext, Job};
use crossbeam::channel::{self, Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Work applied by a worker to one page frame
///
/// One instance (the "atom") is shared by every worker of a query. It must not
/// mutate state except through explicitly synchronized fields.
pub trait PageFrameReducer: Send + Sync + 'static {
    fn reduce(&self, worker_id: usize, frame: &PageFrame, rows: &mut RowList) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Created,
    Dispatching,
    AllDispatched,
    Collecting,
    Done,
    Cancelled,
}

/// State shared between the sequence and in-flight jobs
#[derive(Debug, Default)]
struct SequenceShared {
    cancelled: AtomicBool,
}

impl SequenceShared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

pub struct PageFrameSequence<A: PageFrameReducer> {
    atom: Arc<A>,
    shared: Arc<SequenceShared>,
    state: SequenceState,
    order: ScanOrder,
    frame_count: usize,
    dispatched: usize,
    collected: usize,
    /// Next position in delivery order
    next_position: usize,
    /// Completed tasks waiting for earlier frames, indexed by frame
    reorder: Vec<Option<PageFrameReduceTask>>,
    collect_rx: Option<Receiver<PageFrameReduceTask>>,
}

impl<A: PageFrameReducer> std::fmt::Debug for PageFrameSequence<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFrameSequence")
            .field("state", &self.state)
            .field("order", &self.order)
            .field("frame_count", &self.frame_count)
            .field("dispatched", &self.dispatched)
            .field("collected", &self.collected)
            .finish()
    }
}

impl<A: PageFrameReducer> PageFrameSequence<A> {
    pub fn new(atom: Arc<A>) -> Self {
        Self {
            atom,
            shared: Arc::new(SequenceShared::default()),
            state: SequenceState::Created,
            order: ScanOrder::Ascending,
            frame_count: 0,
            dispatched: 0,
            collected: 0,
            next_position: 0,
            reorder: Vec::new(),
            collect_rx: None,
        }
    }

    /// Split `source` into frames and publish one reduce task per frame
    ///
    /// When the worker queue is full the calling thread reduces the frame
    /// itself, so dispatch never blocks and never drops a frame.
    pub fn dispatch(
        source: &dyn PageFrameSource,
        ctx: &ExecutionContext,
        atom: Arc<A>,
    ) -> Result<Self> {
        let mut sequence = Self::new(atom);
        sequence.start(source, ctx)?;
        Ok(sequence)
    }

    fn start(&mut self, source: &dyn PageFrameSource, ctx: &ExecutionContext) -> Result<()> {
        debug_assert_eq!(self.state, SequenceState::Created, "sequence reused");
        if self.state != SequenceState::Created {
            return Err(QueryError::Internal(
                "page frame sequence dispatched twice".to_string(),
            ));
        }
        self.state = SequenceState::Dispatching;

        let mut frames = source.frames()?;
        self.order = source.scan_order();
        self.frame_count = frames.len();
        self.reorder = (0..frames.len()).map(|_| None).collect();

        if self.order == ScanOrder::Descending {
            // publish in delivery order so the first frames needed finish first
            frames.reverse();
        }

        let (collect_tx, collect_rx) = channel::unbounded();
        self.collect_rx = Some(collect_rx);

        let pool = ctx.worker_pool();
        let mut inline = 0usize;
        for frame in frames {
            let task = PageFrameReduceTask::new(frame, RowList::new(ctx.memory_pool().reservation()));
            let job = self.make_job(task, collect_tx.clone());
            if let Err(job) = pool.try_submit(job) {
                trace!("worker queue full, reducing frame on dispatching thread");
                job(pool.owner_id());
                inline += 1;
            }
            self.dispatched += 1;
        }

        self.state = SequenceState::AllDispatched;
        debug!(
            frames = self.frame_count,
            inline,
            order = ?self.order,
            "page frames dispatched"
        );
        Ok(())
    }

    fn make_job(&self, mut task: PageFrameReduceTask, collect_tx: Sender<PageFrameReduceTask>) -> Job {
        let atom = Arc::clone(&self.atom);
        let shared = Arc::clone(&self.shared);
        Box::new(move |worker_id| {
            run_reduce(atom.as_ref(), &shared, &mut task, worker_id);
            // the consumer may be gone; dropping the task releases its buffers
            let _ = collect_tx.send(task);
        })
    }

    /// Next completed task in delivery order
    ///
    /// Blocks until the next in-order frame is available. Returns `None` once
    /// every frame has been handed out or after the sequence was closed. A
    /// failed frame aborts the sequence and its error is returned.
    pub fn next(&mut self) -> Result<Option<PageFrameReduceTask>> {
        match self.state {
            SequenceState::Done | SequenceState::Cancelled | SequenceState::Created => {
                return Ok(None)
            }
            SequenceState::AllDispatched => self.state = SequenceState::Collecting,
            SequenceState::Dispatching | SequenceState::Collecting => {}
        }

        loop {
            if self.next_position == self.frame_count {
                self.state = SequenceState::Done;
                self.collect_rx = None;
                debug!(frames = self.frame_count, "page frame sequence done");
                return Ok(None);
            }

            let frame_index = self.order.frame_at(self.next_position, self.frame_count);
            if let Some(task) = self.reorder[frame_index].take() {
                self.next_position += 1;
                return Ok(Some(task));
            }

            let mut task = self.receive()?;
            if let Some(error) = task.take_error() {
                warn!(frame = task.frame_index(), %error, "frame reduction failed");
                drop(task);
                self.abort();
                return Err(error);
            }
            if task.is_skipped() {
                // another frame failed; keep collecting until its error arrives
                continue;
            }
            let index = task.frame_index();
            self.reorder[index] = Some(task);
        }
    }

    fn receive(&mut self) -> Result<PageFrameReduceTask> {
        if self.collected == self.dispatched {
            self.abort();
            return Err(QueryError::Internal(
                "all frames collected but delivery is incomplete".to_string(),
            ));
        }
        let rx = self
            .collect_rx
            .as_ref()
            .ok_or_else(|| QueryError::Internal("collect queue is closed".to_string()))?;
        let task = rx.recv().map_err(|_| {
            QueryError::Internal("workers dropped tasks without completing them".to_string())
        })?;
        self.collected += 1;
        Ok(task)
    }

    /// Wait for every frame, discarding the tasks
    ///
    /// Used by aggregations, whose results live in the atom rather than in
    /// the tasks. Returns the number of frames reduced.
    pub fn await_completion(&mut self) -> Result<usize> {
        let mut frames = 0;
        while self.next()?.is_some() {
            frames += 1;
        }
        Ok(frames)
    }

    fn abort(&mut self) {
        self.shared.cancel();
        self.drain();
        self.state = SequenceState::Cancelled;
    }

    /// Wait for in-flight tasks and drop them with their buffers
    fn drain(&mut self) {
        if let Some(rx) = self.collect_rx.take() {
            while self.collected < self.dispatched {
                if rx.recv().is_err() {
                    break;
                }
                self.collected += 1;
            }
        }
        self.reorder.iter_mut().for_each(|slot| *slot = None);
    }

    /// Cancel outstanding work and release every frame buffer; idempotent
    pub fn close(&mut self) {
        match self.state {
            SequenceState::Cancelled => {}
            SequenceState::Done => self.drain(),
            _ => {
                debug!(
                    dispatched = self.dispatched,
                    collected = self.collected,
                    "closing page frame sequence"
                );
                self.abort();
            }
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn order(&self) -> ScanOrder {
        self.order
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl<A: PageFrameReducer> Drop for PageFrameSequence<A> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run the atom over one frame, recording failures on the task
fn run_reduce<A: PageFrameReducer>(
    atom: &A,
    shared: &SequenceShared,
    task: &mut PageFrameReduceTask,
    worker_id: usize,
) {
    if shared.is_cancelled() {
        task.mark_skipped();
        return;
    }

    let frame_index = task.frame_index();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let (frame, rows) = task.parts_mut();
        rows.clear();
        atom.reduce(worker_id, frame, rows)
    }));

    match outcome {
        Ok(Ok(())) => {
            if shared.is_cancelled() {
                task.mark_skipped();
            } else {
                task.mark_reduced(worker_id);
            }
        }
        Ok(Err(error)) => {
            shared.cancel();
            task.fail(error);
        }
        Err(payload) => {
            shared.cancel();
            task.fail(QueryError::WorkerPanicked {
                worker_id,
                frame_index,
                message: panic_message(payload.as_ref()),
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::EngineConfig;
    use crate::physical::page_frame::MemoryPageFrameSource;
    use arrow::array::{Int64Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn source(rows: i64, frame_rows: usize) -> MemoryPageFrameSource {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from((0..rows).collect::<Vec<_>>()))],
        )
        .unwrap();
        MemoryPageFrameSource::try_new(schema, vec![batch], frame_rows).unwrap()
    }

    fn context(workers: usize, queue: usize) -> ExecutionContext {
        ExecutionContext::try_new(EngineConfig {
            worker_count: workers,
            queue_capacity: queue,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    /// Keeps every row; early frames sleep longest so they finish last
    struct SlowEarlyFrames {
        frames: usize,
    }

    impl PageFrameReducer for SlowEarlyFrames {
        fn reduce(&self, _worker_id: usize, frame: &PageFrame, rows: &mut RowList) -> Result<()> {
            let delay = (self.frames - frame.index()) as u64;
            std::thread::sleep(Duration::from_millis(delay));
            for r in 0..frame.row_count() {
                rows.push(r as u64)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_collects_in_frame_order() {
        let ctx = context(4, 64);
        let src = source(100, 10);
        let mut seq =
            PageFrameSequence::dispatch(&src, &ctx, Arc::new(SlowEarlyFrames { frames: 10 }))
                .unwrap();
        assert_eq!(seq.state(), SequenceState::AllDispatched);

        let mut seen = Vec::new();
        while let Some(task) = seq.next().unwrap() {
            assert_eq!(task.rows().len(), 10);
            seen.push(task.frame_index());
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(seq.state(), SequenceState::Done);
        assert!(seq.next().unwrap().is_none());
    }

    #[test]
    fn test_descending_order_reverses_frames() {
        let ctx = context(3, 64);
        let src = source(50, 10).with_descending_order(true);
        let mut seq =
            PageFrameSequence::dispatch(&src, &ctx, Arc::new(SlowEarlyFrames { frames: 5 }))
                .unwrap();

        let mut seen = Vec::new();
        while let Some(task) = seq.next().unwrap() {
            seen.push(task.frame_index());
        }
        assert_eq!(seen, vec![4, 3, 2, 1, 0]);
    }

    struct CountingReducer {
        calls: AtomicUsize,
    }

    impl PageFrameReducer for CountingReducer {
        fn reduce(&self, _worker_id: usize, _frame: &PageFrame, _rows: &mut RowList) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_full_queue_falls_back_to_inline_reduction() {
        let ctx = context(1, 1);
        let src = source(1000, 10);
        let atom = Arc::new(CountingReducer {
            calls: AtomicUsize::new(0),
        });
        let mut seq = PageFrameSequence::dispatch(&src, &ctx, Arc::clone(&atom)).unwrap();
        assert_eq!(seq.dispatched(), 100);
        assert_eq!(seq.await_completion().unwrap(), 100);
        assert_eq!(atom.calls.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_empty_source() {
        let ctx = context(2, 4);
        let src = source(0, 10);
        let atom = Arc::new(CountingReducer {
            calls: AtomicUsize::new(0),
        });
        let mut seq = PageFrameSequence::dispatch(&src, &ctx, atom).unwrap();
        assert_eq!(seq.frame_count(), 0);
        assert!(seq.next().unwrap().is_none());
        assert_eq!(seq.state(), SequenceState::Done);
    }

    struct FailOnFrame(usize);

    impl PageFrameReducer for FailOnFrame {
        fn reduce(&self, _worker_id: usize, frame: &PageFrame, _rows: &mut RowList) -> Result<()> {
            if frame.index() == self.0 {
                return Err(QueryError::Execution("bad row".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_failure_is_raised_at_collection() {
        let ctx = context(2, 64);
        let src = source(100, 10);
        let mut seq = PageFrameSequence::dispatch(&src, &ctx, Arc::new(FailOnFrame(3))).unwrap();

        let err = loop {
            match seq.next() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("failure was swallowed"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, QueryError::Execution(_)));
        assert_eq!(seq.state(), SequenceState::Cancelled);
        assert!(seq.next().unwrap().is_none());
        assert_eq!(ctx.memory_pool().used(), 0);
    }

    struct Panics;

    impl PageFrameReducer for Panics {
        fn reduce(&self, _worker_id: usize, _frame: &PageFrame, _rows: &mut RowList) -> Result<()> {
            panic!("reducer blew up");
        }
    }

    #[test]
    fn test_panic_becomes_error() {
        let ctx = context(2, 64);
        let src = source(20, 10);
        let mut seq = PageFrameSequence::dispatch(&src, &ctx, Arc::new(Panics)).unwrap();
        match seq.next() {
            Err(QueryError::WorkerPanicked { message, .. }) => {
                assert!(message.contains("blew up"))
            }
            other => panic!("unexpected: {:?}", other.map(|t| t.map(|t| t.frame_index()))),
        }
    }

    #[test]
    fn test_close_mid_flight_releases_buffers() {
        let ctx = context(2, 64);
        let src = source(200, 10);
        let mut seq =
            PageFrameSequence::dispatch(&src, &ctx, Arc::new(SlowEarlyFrames { frames: 20 }))
                .unwrap();

        let first = seq.next().unwrap().unwrap();
        assert_eq!(first.frame_index(), 0);
        drop(first);

        seq.close();
        assert_eq!(seq.state(), SequenceState::Cancelled);
        assert!(seq.is_cancelled());
        assert!(seq.next().unwrap().is_none());
        assert_eq!(seq.collected(), seq.dispatched());
        assert_eq!(ctx.memory_pool().used(), 0);

        // closing twice is harmless
        seq.close();
    }
}
