//! Evaluator worker loop.
//!
//! Each worker pulls completed I/Os from the mailbox, strips the
//! pushdown stats prefix when the storage side ran the query, accounts
//! returned/processed rows for raw payloads, drives the evaluator, and
//! records the per-object timing tuple. The per-request record is
//! consumed here, after evaluation, never in the callback.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use strake_tabular::wire;
use strake_tabular::{ExecFlags, QuerySpec};

use crate::engine::Counters;
use crate::eval::{self, EvalMode, Printer};
use crate::mailbox::{Clock, CompletionQueue};

/// Everything a worker thread needs, shared by the whole pool.
pub struct WorkerCtx {
    pub queue: Arc<CompletionQueue>,
    pub counters: Arc<Counters>,
    pub printer: Arc<Printer>,
    pub clock: Clock,
    pub query: QuerySpec,
    pub flags: ExecFlags,
    pub mode: EvalMode,
}

/// Run until the mailbox is closed and drained.
pub fn run(ctx: &WorkerCtx) -> anyhow::Result<()> {
    while let Some(mut io) = ctx.queue.pop_blocking() {
        let result = io
            .result
            .take()
            .context("completion record carried no payload")?;
        let payload = result.with_context(|| format!("storage request for {} failed", io.oid))?;

        let eval2_start = ctx.clock.now_ns();
        let mut times = io.times;
        let mut body: &[u8] = &payload;

        if ctx.flags.use_server_side {
            let (stats, rest) = wire::decode_pushdown_prefix(body)
                .with_context(|| format!("pushdown response prefix for {}", io.oid))?;
            times.read_ns = stats.read_ns;
            times.eval_ns = stats.eval_ns;
            ctx.counters
                .nrows_processed
                .fetch_add(stats.nrows_processed, Ordering::Relaxed);
            body = rest;
        }

        match &ctx.mode {
            EvalMode::RawRows {
                layout,
                server_side,
            } => {
                let count_only =
                    matches!(ctx.query, QuerySpec::CountGreater { .. }) && *server_side;
                if !count_only {
                    let n = strake_tabular::row::row_count(body, *layout)
                        .with_context(|| format!("row payload for {}", io.oid))?
                        as u64;
                    ctx.counters.rows_returned.fetch_add(n, Ordering::Relaxed);
                    if !server_side {
                        ctx.counters.nrows_processed.fetch_add(n, Ordering::Relaxed);
                    }
                }
            }
            EvalMode::FramedPreFiltered { .. } => {
                body = wire::decode_wrapped_stream(body)
                    .with_context(|| format!("wrapped buffer stream for {}", io.oid))?;
            }
            EvalMode::Framed { .. } => {}
        }

        eval::evaluate(
            body,
            &ctx.mode,
            &ctx.query,
            ctx.flags.extra_row_cost,
            &ctx.counters,
            &ctx.printer,
        )
        .with_context(|| format!("evaluate payload for {}", io.oid))?;

        times.eval2_ns = ctx.clock.now_ns().saturating_sub(eval2_start);
        ctx.queue.record_timing(times);
    }
    Ok(())
}
