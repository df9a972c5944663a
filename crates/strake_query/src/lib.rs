//! Client-side driver for a computation-pushdown query engine over an
//! object-storage pool.
//!
//! The pipeline is a bounded-concurrency producer-consumer: the
//! dispatcher keeps a window of storage requests in flight, storage
//! completions land in a FIFO mailbox, and a fixed pool of evaluator
//! threads drains the mailbox, applies residual predicates and
//! projection, and accumulates counters and per-object timings.

pub mod dispatch;
pub mod engine;
pub mod eval;
pub mod logfile;
pub mod mailbox;
pub mod store;
pub mod worker;

pub use engine::{Engine, QueryParams, RunConfig, RunSummary, Traversal};
pub use mailbox::{Clock, CompletionQueue, IoRecord, Timing};
pub use store::{FsPool, ObjectPool};
