//! Bounded-window request dispatcher.
//!
//! The dispatcher runs on the orchestrator thread. It keeps at most
//! `capacity` requests outstanding against the storage pool, sleeping on
//! a condition variable whenever the window is full. Completions arrive
//! on pool-owned callback threads: the callback stamps the response
//! time, frees its window slot, and hands the record to the completion
//! queue. The callback never evaluates.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use anyhow::Context;
use bytes::Bytes;
use strake_tabular::wire::{self, CLASS_TABULAR, METHOD_QUERY_OP};
use strake_tabular::{ExecFlags, QuerySpec};
use tracing::debug;

use crate::mailbox::{Clock, CompletionQueue, IoRecord};
use crate::store::ObjectPool;

struct WindowState {
    in_flight: u32,
    high_water: u32,
}

/// In-flight window shared between the dispatcher and the storage
/// callbacks. `high_water` instruments the peak occupancy for tests and
/// diagnostics.
pub struct DispatchWindow {
    capacity: u32,
    state: Mutex<WindowState>,
    changed: Condvar,
}

impl DispatchWindow {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(WindowState {
                in_flight: 0,
                high_water: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Block until a slot is free, then take it.
    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.in_flight >= self.capacity {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.in_flight += 1;
        state.high_water = state.high_water.max(state.in_flight);
    }

    /// Free a slot. Called from storage callback threads.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Block until every outstanding request has completed.
    pub fn drain(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.in_flight > 0 {
            debug!(remaining = state.in_flight, "draining in-flight requests");
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn high_water(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .high_water
    }
}

/// Submits one read-or-exec request per target, window-bounded.
pub struct Dispatcher {
    pub pool: Arc<dyn ObjectPool>,
    pub window: Arc<DispatchWindow>,
    pub queue: Arc<CompletionQueue>,
    pub clock: Clock,
}

impl Dispatcher {
    /// Dispatch every target, popping from the back of the list. Each
    /// target is submitted exactly once.
    pub fn run(
        &self,
        mut targets: Vec<String>,
        query: &QuerySpec,
        flags: ExecFlags,
    ) -> anyhow::Result<()> {
        // The serialized op is identical for every object.
        let op = if flags.use_server_side {
            let mut buf = Vec::new();
            wire::encode_query_op(&mut buf, query, flags);
            Some(Bytes::from(buf))
        } else {
            None
        };

        while let Some(oid) = targets.pop() {
            self.window.acquire();

            let mut io = Box::new(IoRecord::new(oid.clone()));
            io.times.dispatch = self.clock.now_ns();

            let queue = Arc::clone(&self.queue);
            let window = Arc::clone(&self.window);
            let clock = self.clock;
            let completion = Box::new(move |result: anyhow::Result<Bytes>| {
                let mut io = io;
                io.times.response = clock.now_ns();
                io.result = Some(result);
                window.release();
                queue.push(io);
            });

            let submitted = match &op {
                Some(input) => {
                    self.pool
                        .submit_exec(&oid, CLASS_TABULAR, METHOD_QUERY_OP, input.clone(), completion)
                }
                None => self.pool.submit_read(&oid, completion),
            };
            if let Err(err) = submitted {
                // No completion will arrive for a failed submit.
                self.window.release();
                return Err(err).with_context(|| format!("submit request for {oid}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn window_never_exceeds_capacity() {
        let window = Arc::new(DispatchWindow::new(3));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let window = Arc::clone(&window);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    window.acquire();
                    thread::sleep(Duration::from_micros(50));
                    window.release();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(window.high_water() <= 3);
        window.drain();
    }

    #[test]
    fn drain_waits_for_outstanding_slots() {
        let window = Arc::new(DispatchWindow::new(2));
        window.acquire();
        let releaser = {
            let window = Arc::clone(&window);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                window.release();
            })
        };
        window.drain();
        releaser.join().unwrap();
        assert_eq!(window.high_water(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let window = DispatchWindow::new(0);
        window.acquire();
        window.release();
        assert_eq!(window.high_water(), 1);
    }
}
