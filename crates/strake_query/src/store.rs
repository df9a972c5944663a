//! Storage pool boundary and the bundled directory-backed pool.
//!
//! The engine talks to storage only through [`ObjectPool`]: submit an
//! asynchronous read or remote-method execution and receive the result
//! on a pool-owned callback thread. `FsPool` is the bundled
//! implementation: a pool is a directory, object `obj.N` is the file of
//! the same name, and the remote `tabular` class methods run in-process
//! over those files with the same predicate primitives the client uses,
//! so pushdown stays semantics-preserving.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use anyhow::Context;
use bytes::Bytes;
use regex::Regex;
use strake_tabular::row::{self, RowLayout};
use strake_tabular::sdb::{self, FrameCursor};
use strake_tabular::wire::{
    self, PushdownStats, CLASS_TABULAR, METHOD_BUILD_INDEX, METHOD_QUERY_OP, METHOD_TEST_PAR,
};
use strake_tabular::{QuerySpec, Schema};
use tracing::debug;

use crate::eval::add_extra_row_cost;

/// Completion callback invoked on a pool-owned thread with the request
/// result. Must stay allocation-light and must not evaluate payloads.
pub type Completion = Box<dyn FnOnce(anyhow::Result<Bytes>) + Send + 'static>;

/// Asynchronous object-storage client. Remote methods belong to the
/// `tabular` storage class: `query_op`, `build_index`, and the latent
/// `test_par` debugging hook.
pub trait ObjectPool: Send + Sync {
    /// Read the full object bytes; result delivered via `completion`.
    fn submit_read(&self, oid: &str, completion: Completion) -> anyhow::Result<()>;
    /// Execute a named storage-class method against one object; result
    /// delivered via `completion`.
    fn submit_exec(
        &self,
        oid: &str,
        class: &str,
        method: &str,
        input: Bytes,
        completion: Completion,
    ) -> anyhow::Result<()>;
    /// Synchronous variant of `submit_exec`, used by offline helpers
    /// such as the index builder.
    fn exec(&self, oid: &str, class: &str, method: &str, input: Bytes) -> anyhow::Result<Bytes>;
}

const DEFAULT_IO_THREADS: usize = 2;
const INDEX_ENTRY_LEN: usize = 12;

enum TaskKind {
    Read,
    Exec {
        class: String,
        method: String,
        input: Bytes,
    },
}

struct IoTask {
    oid: String,
    kind: TaskKind,
    completion: Completion,
}

/// Directory-backed pool with a fixed set of I/O threads delivering
/// completions.
pub struct FsPool {
    dir: PathBuf,
    tx: mpsc::Sender<IoTask>,
}

impl FsPool {
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        anyhow::ensure!(
            dir.is_dir(),
            "pool directory {} does not exist",
            dir.display()
        );

        let (tx, rx) = mpsc::channel::<IoTask>();
        let rx = Arc::new(Mutex::new(rx));
        let io_threads = read_env_usize("STRAKE_IO_THREADS", DEFAULT_IO_THREADS).max(1);
        for i in 0..io_threads {
            let dir = dir.clone();
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name(format!("pool-io-{i}"))
                .spawn(move || io_loop(&dir, &rx))
                .context("spawn pool io thread")?;
        }
        Ok(Self { dir, tx })
    }
}

impl ObjectPool for FsPool {
    fn submit_read(&self, oid: &str, completion: Completion) -> anyhow::Result<()> {
        self.tx
            .send(IoTask {
                oid: oid.to_string(),
                kind: TaskKind::Read,
                completion,
            })
            .map_err(|_| anyhow::anyhow!("pool io threads stopped"))
    }

    fn submit_exec(
        &self,
        oid: &str,
        class: &str,
        method: &str,
        input: Bytes,
        completion: Completion,
    ) -> anyhow::Result<()> {
        self.tx
            .send(IoTask {
                oid: oid.to_string(),
                kind: TaskKind::Exec {
                    class: class.to_string(),
                    method: method.to_string(),
                    input,
                },
                completion,
            })
            .map_err(|_| anyhow::anyhow!("pool io threads stopped"))
    }

    fn exec(&self, oid: &str, class: &str, method: &str, input: Bytes) -> anyhow::Result<Bytes> {
        perform_exec(&self.dir, oid, class, method, &input)
    }
}

fn io_loop(dir: &Path, rx: &Mutex<mpsc::Receiver<IoTask>>) {
    loop {
        // Hold the receiver lock only while fetching the next task.
        let task = {
            let guard = rx.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.recv() {
                Ok(task) => task,
                Err(_) => break,
            }
        };
        let result = match &task.kind {
            TaskKind::Read => read_object(dir, &task.oid).map(Bytes::from),
            TaskKind::Exec {
                class,
                method,
                input,
            } => perform_exec(dir, &task.oid, class, method, input),
        };
        (task.completion)(result);
    }
}

fn read_object(dir: &Path, oid: &str) -> anyhow::Result<Vec<u8>> {
    fs::read(dir.join(oid)).with_context(|| format!("read object {oid}"))
}

fn perform_exec(
    dir: &Path,
    oid: &str,
    class: &str,
    method: &str,
    input: &[u8],
) -> anyhow::Result<Bytes> {
    anyhow::ensure!(class == CLASS_TABULAR, "unknown storage class {class:?}");
    match method {
        METHOD_QUERY_OP => serve_query(dir, oid, input),
        METHOD_BUILD_INDEX => {
            let batch_size = wire::decode_build_index(input)?;
            build_object_index(dir, oid, batch_size)?;
            Ok(Bytes::new())
        }
        METHOD_TEST_PAR => {
            let (iters, read) = wire::decode_test_par(input)?;
            for _ in 0..iters {
                if read {
                    std::hint::black_box(read_object(dir, oid)?);
                } else {
                    add_extra_row_cost(1024);
                }
            }
            Ok(Bytes::new())
        }
        other => anyhow::bail!("unknown tabular class method {other:?}"),
    }
}

/// Storage-side execution of a serialized query op.
fn serve_query(dir: &Path, oid: &str, input: &[u8]) -> anyhow::Result<Bytes> {
    let (query, flags) = wire::decode_query_op(input)?;

    let read_start = Instant::now();
    let blob = read_object(dir, oid)?;
    let read_ns = elapsed_ns(read_start);

    let eval_start = Instant::now();
    let mut nrows_processed = 0u64;
    let mut tail = Vec::new();

    match &query {
        QuerySpec::Structured {
            table_schema,
            query_schema,
        } => {
            let table = Schema::parse(table_schema)?;
            let qschema = Schema::parse(query_schema)?;
            let mut stream = Vec::new();
            for frame in FrameCursor::new(&blob) {
                let frame = frame?;
                let (header, _) = sdb::read_header(frame)?;
                nrows_processed += u64::from(header.nrows);
                if flags.fastpath || !flags.projection {
                    sdb::write_frame(&mut stream, frame);
                } else {
                    let out = sdb::transform(&table, &qschema, frame)?;
                    sdb::write_frame(&mut stream, &out);
                }
            }
            wire::encode_wrapped_stream(&mut tail, &stream);
        }
        QuerySpec::CountGreater { .. } => {
            let n = row::row_count(&blob, RowLayout::Full)?;
            nrows_processed = n as u64;
            let mut matching = 0u64;
            for i in 0..n {
                let r = row::row(&blob, RowLayout::Full, i);
                if query.matches_row(&r, None) {
                    matching += 1;
                    add_extra_row_cost(flags.extra_row_cost);
                }
            }
            wire::encode_row_count(&mut tail, matching);
        }
        QuerySpec::SelectAll => {
            let n = row::row_count(&blob, RowLayout::Full)?;
            nrows_processed = n as u64;
            tail.extend_from_slice(&blob);
        }
        _ => {
            let selected = if flags.use_index {
                let rows = index_lookup(dir, oid, &query)?;
                nrows_processed = rows.len() as u64;
                rows
            } else {
                let n = row::row_count(&blob, RowLayout::Full)?;
                nrows_processed = n as u64;
                let re = match &query {
                    QuerySpec::SelectRegex { pattern } => Some(
                        Regex::new(pattern)
                            .with_context(|| format!("compile comment regex {pattern:?}"))?,
                    ),
                    _ => None,
                };
                let mut rows = Vec::new();
                for i in 0..n {
                    let r = row::row(&blob, RowLayout::Full, i);
                    if query.matches_row(&r, re.as_ref()) {
                        rows.push(i);
                        add_extra_row_cost(flags.extra_row_cost);
                    }
                }
                rows
            };
            for i in selected {
                let r = row::row(&blob, RowLayout::Full, i);
                if flags.projection {
                    row::write_projected_row(&mut tail, r.order_key(), r.line_number());
                } else {
                    tail.extend_from_slice(&blob[i * row::FULL_STRIDE..(i + 1) * row::FULL_STRIDE]);
                }
            }
        }
    }

    let stats = PushdownStats {
        read_ns,
        eval_ns: elapsed_ns(eval_start),
        nrows_processed,
    };
    let mut response = Vec::with_capacity(24 + tail.len());
    wire::encode_pushdown_prefix(&mut response, &stats);
    response.extend_from_slice(&tail);
    Ok(Bytes::from(response))
}

fn index_path(dir: &Path, oid: &str) -> PathBuf {
    dir.join(format!("{oid}.idx"))
}

/// Scan an object and write its `(order_key, line_number) -> row` index
/// sidecar, flushing every `batch_size` entries.
fn build_object_index(dir: &Path, oid: &str, batch_size: u32) -> anyhow::Result<()> {
    let blob = read_object(dir, oid)?;
    let n = row::row_count(&blob, RowLayout::Full)?;
    let batch_size = (batch_size.max(1)) as usize;

    let mut out = File::create(index_path(dir, oid))
        .with_context(|| format!("create index sidecar for {oid}"))?;
    let mut batch = Vec::with_capacity(batch_size * INDEX_ENTRY_LEN);
    for i in 0..n {
        let r = row::row(&blob, RowLayout::Full, i);
        batch.extend_from_slice(&r.order_key().to_le_bytes());
        batch.extend_from_slice(&r.line_number().to_le_bytes());
        batch.extend_from_slice(&(i as u32).to_le_bytes());
        if batch.len() >= batch_size * INDEX_ENTRY_LEN {
            out.write_all(&batch)
                .with_context(|| format!("write index sidecar for {oid}"))?;
            debug!(oid, rows = i + 1, "index batch flushed");
            batch.clear();
        }
    }
    out.write_all(&batch)
        .with_context(|| format!("write index sidecar for {oid}"))?;
    Ok(())
}

/// Resolve a key lookup through the index sidecar instead of a scan.
fn index_lookup(dir: &Path, oid: &str, query: &QuerySpec) -> anyhow::Result<Vec<usize>> {
    let QuerySpec::SelectByKey {
        order_key,
        line_number,
    } = query
    else {
        anyhow::bail!("index lookup is only defined for key queries");
    };
    let path = index_path(dir, oid);
    let data = fs::read(&path)
        .with_context(|| format!("index for {oid} not built ({})", path.display()))?;
    anyhow::ensure!(
        data.len() % INDEX_ENTRY_LEN == 0,
        "index sidecar for {oid} is truncated"
    );

    let mut rows = Vec::new();
    for entry in data.chunks_exact(INDEX_ENTRY_LEN) {
        let mut b = [0u8; 4];
        b.copy_from_slice(&entry[0..4]);
        let key = i32::from_le_bytes(b);
        b.copy_from_slice(&entry[4..8]);
        let line = i32::from_le_bytes(b);
        if key == *order_key && line == *line_number {
            b.copy_from_slice(&entry[8..12]);
            rows.push(u32::from_le_bytes(b) as usize);
        }
    }
    Ok(rows)
}

fn elapsed_ns(start: Instant) -> u64 {
    start.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64
}

fn read_env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| usize::from_str(&v).ok())
        .unwrap_or(default)
}
