//! A bounded worker pool whose queue orders tasks by caller-supplied
//! priority, and a merged iterator that streams partial results to the
//! consumer as workers finish.
//!
//! Grounded on `reladiff/thread_utils.py`'s `AutoPriorityQueue` /
//! `ThreadedYielder`: tasks are ordered by `(-priority, sequence_id)` so
//! higher priority runs first and ties break FIFO via a monotonic counter.
//! Unlike the source, this does not spin on `sleep(1ms)` while idle — the
//! buffering discipline is a `parking_lot::Condvar` that every task
//! completion notifies and that the backpressure check and shutdown path
//! both wait on. A producer may overshoot the configured lookahead buffer
//! by at most the number of concurrently-racing workers, since the
//! check-then-append is not atomic across workers — this mirrors the
//! source's own non-atomic `_worker` loop rather than regressing it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::TableDiffError;
use crate::keyvalue::{Row, Sign};

/// A unit of work submitted to the pool: produces zero or more `(sign,
/// row)` pairs, contributed to the output stream in order, or an error
/// that latches into the yielder.
pub type Task = Box<dyn FnOnce() -> Result<Option<Vec<(Sign, Row)>>, TableDiffError> + Send>;

struct PendingTask {
    priority: i64,
    sequence: u64,
    task: Task,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for PendingTask {}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap pops the greatest element first: higher priority first,
        // and for equal priority, the *lower* sequence number first (FIFO),
        // hence the reversal on sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<PendingTask>>,
    queue_not_empty: Condvar,
    output: Mutex<VecDeque<(Sign, Row)>>,
    output_drained: Condvar,
    in_flight: AtomicUsize,
    shutting_down: AtomicBool,
    exception: Mutex<Option<TableDiffError>>,
    next_sequence: AtomicUsize,
    lookahead: usize,
}

/// A bounded worker pool that also behaves as a streaming iterator over
/// the results its tasks produce.
pub struct PriorityYielder {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl PriorityYielder {
    /// `max_workers = None` sizes the pool to the number of available
    /// cores (falling back to 1). `lookahead_buffer` caps how many
    /// not-yet-consumed result batches may accumulate before producers
    /// stall; 0 means unbounded.
    pub fn new(max_workers: Option<usize>, lookahead_buffer: usize) -> Self {
        let worker_count = max_workers
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);

        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            queue_not_empty: Condvar::new(),
            output: Mutex::new(VecDeque::new()),
            output_drained: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            exception: Mutex::new(None),
            next_sequence: AtomicUsize::new(0),
            lookahead: lookahead_buffer,
        });

        let workers = (0..worker_count)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Submit a task at the given priority. Higher priority runs first;
    /// equal priority is FIFO.
    pub fn submit(&self, priority: i64, task: Task) {
        let sequence = self.shared.next_sequence.fetch_add(1, AtomicOrdering::SeqCst) as u64;
        self.shared.in_flight.fetch_add(1, AtomicOrdering::SeqCst);
        let mut queue = self.shared.queue.lock();
        queue.push(PendingTask { priority, sequence, task });
        self.shared.queue_not_empty.notify_one();
    }

    /// Cancels queued work and waits for in-flight tasks to finish.
    pub fn shutdown(self) {
        self.shared.shutting_down.store(true, AtomicOrdering::SeqCst);
        self.shared.queue.lock().clear();
        self.shared.queue_not_empty.notify_all();
        self.shared.output_drained.notify_all();
        for worker in self.workers {
            let _ = worker.join();
        }
    }

    /// Pulls every element contributed so far and blocks for more until
    /// the task graph is fully drained, then returns `None`. Re-raises the
    /// first worker exception (if any) instead of returning `None`.
    pub fn recv(&self) -> Option<Result<(Sign, Row), TableDiffError>> {
        loop {
            if let Some(err) = self.shared.exception.lock().clone() {
                return Some(Err(err));
            }

            {
                let mut out = self.shared.output.lock();
                if let Some(item) = out.pop_front() {
                    drop(out);
                    self.shared.output_drained.notify_all();
                    return Some(Ok(item));
                }
            }

            if self.shared.in_flight.load(AtomicOrdering::SeqCst) == 0 {
                if let Some(err) = self.shared.exception.lock().clone() {
                    return Some(Err(err));
                }
                return None;
            }

            let mut queue = self.shared.queue.lock();
            self.shared
                .queue_not_empty
                .wait_for(&mut queue, std::time::Duration::from_millis(50));
        }
    }
}

/// Consume every `(sign, row)` produced by the yielder as a plain
/// iterator, raising the first latched error on the final pull.
pub struct YielderIter<'a> {
    yielder: &'a PriorityYielder,
}

impl<'a> Iterator for YielderIter<'a> {
    type Item = Result<(Sign, Row), TableDiffError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.yielder.recv()
    }
}

impl PriorityYielder {
    pub fn iter(&self) -> YielderIter<'_> {
        YielderIter { yielder: self }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        if shared.shutting_down.load(AtomicOrdering::SeqCst) {
            return;
        }

        let pending = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutting_down.load(AtomicOrdering::SeqCst) {
                    return;
                }
                if let Some(item) = queue.pop() {
                    break item;
                }
                if shared.in_flight.load(AtomicOrdering::SeqCst) == 0 {
                    return;
                }
                shared
                    .queue_not_empty
                    .wait_for(&mut queue, std::time::Duration::from_millis(50));
            }
        };

        // Backpressure: stall if the output buffer is at its lookahead
        // cap and there is still other work in flight to wait on.
        if shared.lookahead > 0 {
            loop {
                let len = shared.output.lock().len();
                if len < shared.lookahead || shared.in_flight.load(AtomicOrdering::SeqCst) <= 1 {
                    break;
                }
                let mut out = shared.output.lock();
                shared.output_drained.wait_for(&mut out, std::time::Duration::from_millis(50));
            }
        }

        let result = (pending.task)();
        match result {
            Ok(Some(items)) => {
                let mut out = shared.output.lock();
                out.extend(items);
                drop(out);
                shared.output_drained.notify_all();
            }
            Ok(None) => {}
            Err(e) => {
                let mut slot = shared.exception.lock();
                if slot.is_none() {
                    *slot = Some(e);
                }
            }
        }

        shared.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
        shared.queue_not_empty.notify_all();
        shared.output_drained.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyvalue::{ColumnValue, KeyValue};

    #[test]
    fn submitted_tasks_contribute_results() {
        let yielder = PriorityYielder::new(Some(2), 0);
        yielder.submit(
            0,
            Box::new(|| Ok(Some(vec![(Sign::Minus, vec![]), (Sign::Plus, vec![])]))),
        );
        let mut results = Vec::new();
        while let Some(item) = yielder.recv() {
            results.push(item.unwrap());
        }
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn task_returning_none_contributes_nothing() {
        let yielder = PriorityYielder::new(Some(1), 0);
        yielder.submit(0, Box::new(|| Ok(None)));
        assert!(yielder.recv().is_none());
    }

    #[test]
    fn first_exception_is_latched_and_reraised_on_every_subsequent_pull() {
        let yielder = PriorityYielder::new(Some(1), 0);
        yielder.submit(0, Box::new(|| Err(TableDiffError::Adapter("boom".into()))));
        assert!(yielder.recv().expect("expected the latched error").is_err());
        assert!(yielder.recv().expect("still latched").is_err());
        assert!(yielder.recv().expect("still latched").is_err());
    }

    #[test]
    fn higher_priority_tasks_are_not_starved_by_lower_priority_backlog() {
        // Single worker so ordering is deterministic: submit low priority
        // first, then high priority; the high-priority task's own result
        // must still surface (we don't assert strict ordering of output
        // across tasks here, only that both complete without deadlock).
        let yielder = PriorityYielder::new(Some(1), 0);
        for _ in 0..5 {
            yielder.submit(0, Box::new(|| Ok(Some(vec![(Sign::Minus, vec![])]))));
        }
        yielder.submit(10, Box::new(|| Ok(Some(vec![(Sign::Plus, vec![])]))));

        let mut total = 0;
        while yielder.recv().is_some() {
            total += 1;
        }
        assert_eq!(total, 6);
    }

    #[test]
    fn single_task_output_preserves_internal_order() {
        // A single task's rows must surface in the order the task produced
        // them, not reversed — the output buffer is a FIFO queue, not a
        // stack.
        let yielder = PriorityYielder::new(Some(1), 0);
        yielder.submit(
            0,
            Box::new(|| {
                Ok(Some(vec![
                    (Sign::Minus, vec![ColumnValue::Key(KeyValue::Int(1))]),
                    (Sign::Plus, vec![ColumnValue::Key(KeyValue::Int(2))]),
                    (Sign::Minus, vec![ColumnValue::Key(KeyValue::Int(3))]),
                ]))
            }),
        );
        let mut results = Vec::new();
        while let Some(item) = yielder.recv() {
            results.push(item.unwrap());
        }
        assert_eq!(
            results,
            vec![
                (Sign::Minus, vec![ColumnValue::Key(KeyValue::Int(1))]),
                (Sign::Plus, vec![ColumnValue::Key(KeyValue::Int(2))]),
                (Sign::Minus, vec![ColumnValue::Key(KeyValue::Int(3))]),
            ]
        );
    }

    #[test]
    fn shutdown_cancels_queued_work() {
        let yielder = PriorityYielder::new(Some(1), 0);
        yielder.submit(0, Box::new(|| Ok(Some(vec![(Sign::Minus, vec![])]))));
        yielder.shutdown();
    }
}
