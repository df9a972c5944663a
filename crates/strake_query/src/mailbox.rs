//! Completion mailbox and timing records.
//!
//! The queue is the only shared mutable state between storage callbacks
//! and evaluator threads. It also owns the timing log: appends take the
//! same lock that orders completions, so the log order matches the
//! completion order without any sorting.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;

/// Monotonic nanosecond clock anchored at engine start.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-object timing tuple, written to the timing log in completion
/// order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timing {
    pub dispatch: u64,
    pub response: u64,
    pub read_ns: u64,
    pub eval_ns: u64,
    pub eval2_ns: u64,
}

/// Per-request state. Created at dispatch, completed by the storage
/// callback, consumed (and dropped) by an evaluator thread.
#[derive(Debug)]
pub struct IoRecord {
    pub oid: String,
    pub times: Timing,
    pub result: Option<anyhow::Result<Bytes>>,
}

impl IoRecord {
    pub fn new(oid: String) -> Self {
        Self {
            oid,
            times: Timing::default(),
            result: None,
        }
    }
}

struct QueueState {
    ready: VecDeque<Box<IoRecord>>,
    timings: Vec<Timing>,
    closed: bool,
}

/// Thread-safe FIFO of completed I/Os with edge-triggered wake-ups on
/// `push` and `close`.
pub struct CompletionQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CompletionQueue {
    pub fn new(timing_capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                timings: Vec::with_capacity(timing_capacity),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn push(&self, io: Box<IoRecord>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.ready.push_back(io);
        drop(state);
        self.ready.notify_one();
    }

    /// Blocks until an item is available or the queue is closed.
    /// Returns `None` iff the queue is empty *and* closed.
    pub fn pop_blocking(&self) -> Option<Box<IoRecord>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(io) = state.ready.pop_front() {
                return Some(io);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the queue; pending items drain first, then `pop_blocking`
    /// returns `None`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        drop(state);
        self.ready.notify_all();
    }

    pub fn record_timing(&self, times: Timing) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.timings.push(times);
    }

    pub fn take_timings(&self) -> Vec<Timing> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut state.timings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn record(oid: &str) -> Box<IoRecord> {
        Box::new(IoRecord::new(oid.to_string()))
    }

    #[test]
    fn pops_in_fifo_order() {
        let queue = CompletionQueue::new(0);
        queue.push(record("obj.0"));
        queue.push(record("obj.1"));
        queue.close();
        assert_eq!(queue.pop_blocking().unwrap().oid, "obj.0");
        assert_eq!(queue.pop_blocking().unwrap().oid, "obj.1");
        assert!(queue.pop_blocking().is_none());
    }

    #[test]
    fn close_drains_pending_items_first() {
        let queue = CompletionQueue::new(0);
        queue.push(record("obj.0"));
        queue.close();
        assert!(queue.pop_blocking().is_some());
        assert!(queue.pop_blocking().is_none());
    }

    #[test]
    fn blocked_pop_wakes_on_push() {
        let queue = Arc::new(CompletionQueue::new(0));
        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking().map(|io| io.oid))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(record("obj.7"));
        assert_eq!(popper.join().unwrap().as_deref(), Some("obj.7"));
    }

    #[test]
    fn blocked_pop_wakes_on_close() {
        let queue = Arc::new(CompletionQueue::new(0));
        let popper = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_blocking().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(popper.join().unwrap());
    }

    #[test]
    fn timings_append_in_record_order() {
        let queue = CompletionQueue::new(2);
        queue.record_timing(Timing {
            dispatch: 1,
            ..Timing::default()
        });
        queue.record_timing(Timing {
            dispatch: 2,
            ..Timing::default()
        });
        let timings = queue.take_timings();
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[0].dispatch, 1);
        assert_eq!(timings[1].dispatch, 2);
    }
}
