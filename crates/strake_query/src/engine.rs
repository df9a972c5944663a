//! Orchestration: argument validation, target enumeration, and the run
//! loop that wires the dispatcher, the completion queue, and the
//! evaluator pool together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::Context;
use bytes::Bytes;
use rand::seq::SliceRandom;
use strake_tabular::schema::LINEITEM_SCHEMA;
use strake_tabular::wire::{CLASS_TABULAR, METHOD_BUILD_INDEX};
use strake_tabular::{wire, ExecFlags, QuerySpec, RowLayout, Schema};
use tracing::info;

use crate::dispatch::{DispatchWindow, Dispatcher};
use crate::eval::{EvalMode, Printer};
use crate::mailbox::{Clock, CompletionQueue, Timing};
use crate::store::ObjectPool;
use crate::worker::{self, WorkerCtx};

/// Global result counters. Atomic; no cross-object ordering guarantee.
#[derive(Debug, Default)]
pub struct Counters {
    pub result_count: AtomicU64,
    pub rows_returned: AtomicU64,
    pub nrows_processed: AtomicU64,
}

/// Traversal order over the target list. The dispatcher pops from the
/// back, so `fwd` reverses the vector first — the naming is historical
/// and the behavior is preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Traversal {
    Forward,
    Backward,
    Random,
}

impl std::str::FromStr for Traversal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fwd" => Ok(Traversal::Forward),
            "bwd" => Ok(Traversal::Backward),
            "rnd" => Ok(Traversal::Random),
            other => anyhow::bail!("invalid direction {other:?} (expected fwd, bwd, or rnd)"),
        }
    }
}

/// Engine knobs independent of the query shape.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub num_objs: u32,
    pub wthreads: usize,
    pub qdepth: u32,
    pub dir: Traversal,
    pub quiet: bool,
}

/// Raw query parameters as provided on the CLI, sentinel defaults
/// included.
#[derive(Clone, Debug)]
pub struct QueryParams {
    pub extended_price: f64,
    pub order_key: i32,
    pub line_number: i32,
    pub ship_date_low: i32,
    pub ship_date_high: i32,
    pub discount_low: f64,
    pub discount_high: f64,
    pub quantity: f64,
    pub comment_regex: String,
    pub project_col_names: String,
    pub use_cls: bool,
    pub use_index: bool,
    pub projection: bool,
    pub extra_row_cost: u64,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            extended_price: 0.0,
            order_key: 0,
            line_number: 0,
            ship_date_low: -9999,
            ship_date_high: -9999,
            discount_low: -9999.0,
            discount_high: -9999.0,
            quantity: 0.0,
            comment_regex: String::new(),
            project_col_names: "*".to_string(),
            use_cls: false,
            use_index: false,
            projection: false,
            extra_row_cost: 0,
        }
    }
}

/// Validate a query name and its parameters, and print the
/// SQL-equivalent description. Fails before any I/O on a bad
/// combination.
pub fn resolve_query(name: &str, params: &QueryParams) -> anyhow::Result<(QuerySpec, ExecFlags)> {
    let mut flags = ExecFlags {
        use_server_side: params.use_cls,
        use_index: params.use_index,
        projection: params.projection,
        fastpath: false,
        extra_row_cost: params.extra_row_cost,
    };

    let query = match name {
        "a" | "b" | "c" => {
            anyhow::ensure!(
                !params.use_index,
                "query {name:?} does not support --use-index"
            );
            anyhow::ensure!(
                params.extended_price != 0.0,
                "query {name:?} requires --extended-price"
            );
            match name {
                "a" => QuerySpec::CountGreater {
                    extended_price: params.extended_price,
                },
                "b" => QuerySpec::SelectGreater {
                    extended_price: params.extended_price,
                },
                _ => QuerySpec::SelectEqual {
                    extended_price: params.extended_price,
                },
            }
        }
        "d" => {
            if params.use_index {
                anyhow::ensure!(params.use_cls, "--use-index requires --use-cls");
            }
            anyhow::ensure!(params.order_key != 0, "query \"d\" requires --order-key");
            anyhow::ensure!(params.line_number != 0, "query \"d\" requires --line-number");
            QuerySpec::SelectByKey {
                order_key: params.order_key,
                line_number: params.line_number,
            }
        }
        "e" => {
            anyhow::ensure!(!params.use_index, "query \"e\" does not support --use-index");
            anyhow::ensure!(
                params.ship_date_low != -9999,
                "query \"e\" requires --ship-date-low"
            );
            anyhow::ensure!(
                params.ship_date_high != -9999,
                "query \"e\" requires --ship-date-high"
            );
            anyhow::ensure!(
                params.discount_low != -9999.0,
                "query \"e\" requires --discount-low"
            );
            anyhow::ensure!(
                params.discount_high != -9999.0,
                "query \"e\" requires --discount-high"
            );
            anyhow::ensure!(params.quantity != 0.0, "query \"e\" requires --quantity");
            QuerySpec::SelectRange {
                ship_date_low: params.ship_date_low,
                ship_date_high: params.ship_date_high,
                discount_low: params.discount_low,
                discount_high: params.discount_high,
                quantity: params.quantity,
            }
        }
        "f" => {
            anyhow::ensure!(!params.use_index, "query \"f\" does not support --use-index");
            anyhow::ensure!(
                !params.comment_regex.is_empty(),
                "query \"f\" requires --comment_regex"
            );
            regex::Regex::new(&params.comment_regex)
                .with_context(|| format!("compile comment regex {:?}", params.comment_regex))?;
            QuerySpec::SelectRegex {
                pattern: params.comment_regex.clone(),
            }
        }
        "fastpath" => {
            anyhow::ensure!(
                !params.use_index,
                "query \"fastpath\" does not support --use-index"
            );
            anyhow::ensure!(
                !params.projection,
                "query \"fastpath\" does not support --projection"
            );
            QuerySpec::SelectAll
        }
        "flatbuf" => {
            let table = Schema::parse(LINEITEM_SCHEMA).context("parse table schema")?;
            let names = params.project_col_names.trim();
            let query_schema = if names == "*" {
                // Identical schemas and no predicates at this surface:
                // the storage side may skip processing entirely.
                flags.fastpath = true;
                table.clone()
            } else {
                flags.projection = true;
                table
                    .project(names)
                    .with_context(|| format!("resolve projection list {names:?}"))?
            };
            QuerySpec::Structured {
                table_schema: table.serialize(),
                query_schema: query_schema.serialize(),
            }
        }
        other => anyhow::bail!("invalid query: {other}"),
    };

    println!("{}", query.describe());
    if let QuerySpec::Structured {
        table_schema,
        query_schema,
    } = &query
    {
        println!("table_schema:\n{table_schema}");
        println!("query_schema:\n{query_schema}");
    }
    Ok((query, flags))
}

/// Targets are `obj.0 .. obj.{num_objs-1}`, built rather than
/// discovered.
pub fn build_targets(num_objs: u32) -> Vec<String> {
    (0..num_objs).map(|i| format!("obj.{i}")).collect()
}

/// Apply the traversal order. The result is consumed back-to-front by
/// the dispatcher.
pub fn ordered_targets(num_objs: u32, dir: Traversal) -> Vec<String> {
    let mut targets = build_targets(num_objs);
    match dir {
        Traversal::Forward => targets.reverse(),
        Traversal::Backward => {}
        Traversal::Random => targets.shuffle(&mut rand::thread_rng()),
    }
    targets
}

/// Aggregate results of one run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub result_count: u64,
    pub rows_returned: u64,
    pub nrows_processed: u64,
    pub timings: Vec<Timing>,
    /// Peak in-flight request count observed by the dispatcher window.
    pub max_in_flight: u32,
}

impl RunSummary {
    /// The final stdout line. `rows_returned` prints as `-1` for the
    /// count query under pushdown, where no rows come back (historical
    /// behavior, preserved).
    pub fn total_line(&self, query: &QuerySpec, flags: ExecFlags) -> String {
        if matches!(query, QuerySpec::CountGreater { .. }) && flags.use_server_side {
            format!(
                "total result row count: {} / -1; nrows_processed={}",
                self.result_count, self.nrows_processed
            )
        } else {
            format!(
                "total result row count: {} / {}; nrows_processed={}",
                self.result_count, self.rows_returned, self.nrows_processed
            )
        }
    }
}

/// One query run against one pool: dispatcher on the calling thread,
/// `wthreads` evaluator threads, a bounded window of storage requests.
pub struct Engine {
    cfg: RunConfig,
    query: QuerySpec,
    flags: ExecFlags,
    pool: Arc<dyn ObjectPool>,
}

impl Engine {
    pub fn new(
        cfg: RunConfig,
        query: QuerySpec,
        flags: ExecFlags,
        pool: Arc<dyn ObjectPool>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(cfg.num_objs > 0, "--num-objs must be > 0");
        anyhow::ensure!(cfg.wthreads > 0, "--wthreads must be > 0");
        anyhow::ensure!(cfg.qdepth > 0, "--qdepth must be > 0");
        Ok(Self {
            cfg,
            query,
            flags,
            pool,
        })
    }

    pub fn run(&self) -> anyhow::Result<RunSummary> {
        // Schema parsing happens here so bad schemas fail before any
        // request is dispatched.
        let mode = build_eval_mode(&self.query, self.flags)?;

        let clock = Clock::new();
        let counters = Arc::new(Counters::default());
        let queue = Arc::new(CompletionQueue::new(self.cfg.num_objs as usize));
        let window = Arc::new(DispatchWindow::new(self.cfg.qdepth));
        let printer = Arc::new(Printer::new(self.cfg.quiet, self.flags.projection));

        let ctx = Arc::new(WorkerCtx {
            queue: Arc::clone(&queue),
            counters: Arc::clone(&counters),
            printer,
            clock,
            query: self.query.clone(),
            flags: self.flags,
            mode,
        });

        let mut handles = Vec::with_capacity(self.cfg.wthreads);
        for i in 0..self.cfg.wthreads {
            let ctx = Arc::clone(&ctx);
            handles.push(
                thread::Builder::new()
                    .name(format!("eval-{i}"))
                    .spawn(move || worker::run(&ctx))
                    .context("spawn eval worker")?,
            );
        }

        let targets = ordered_targets(self.cfg.num_objs, self.cfg.dir);
        let dispatcher = Dispatcher {
            pool: Arc::clone(&self.pool),
            window: Arc::clone(&window),
            queue: Arc::clone(&queue),
            clock,
        };
        let dispatch_result = dispatcher.run(targets, &self.query, self.flags);

        // Even on a dispatch error, wait out the in-flight requests and
        // stop the workers before returning, so no callback writes to
        // state we are tearing down.
        window.drain();
        queue.close();

        let mut worker_err = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if worker_err.is_none() {
                        worker_err = Some(err);
                    }
                }
                Err(_) => {
                    if worker_err.is_none() {
                        worker_err = Some(anyhow::anyhow!("eval worker panicked"));
                    }
                }
            }
        }
        dispatch_result?;
        if let Some(err) = worker_err {
            return Err(err);
        }

        Ok(RunSummary {
            result_count: counters.result_count.load(Ordering::Relaxed),
            rows_returned: counters.rows_returned.load(Ordering::Relaxed),
            nrows_processed: counters.nrows_processed.load(Ordering::Relaxed),
            timings: queue.take_timings(),
            max_in_flight: window.high_water(),
        })
    }
}

fn build_eval_mode(query: &QuerySpec, flags: ExecFlags) -> anyhow::Result<EvalMode> {
    if let QuerySpec::Structured {
        table_schema,
        query_schema,
    } = query
    {
        let query_schema = Schema::parse(query_schema).context("parse query schema")?;
        if flags.use_server_side {
            return Ok(EvalMode::FramedPreFiltered { query_schema });
        }
        let table_schema = Schema::parse(table_schema).context("parse table schema")?;
        return Ok(EvalMode::Framed {
            table_schema,
            query_schema,
            projection: flags.projection && !flags.fastpath,
        });
    }
    if flags.projection && flags.use_server_side {
        return Ok(EvalMode::RawRows {
            layout: RowLayout::Projected,
            server_side: true,
        });
    }
    Ok(EvalMode::RawRows {
        layout: RowLayout::Full,
        server_side: flags.use_server_side,
    })
}

/// Offline helper behind `--build-index`: every worker pops targets
/// from a shared list and invokes the remote index builder.
pub fn run_build_index(
    pool: &Arc<dyn ObjectPool>,
    targets: Vec<String>,
    wthreads: usize,
    batch_size: u32,
) -> anyhow::Result<()> {
    anyhow::ensure!(wthreads > 0, "--wthreads must be > 0");
    let targets = Arc::new(Mutex::new(targets));
    let input = Bytes::from(wire::encode_build_index(batch_size));

    let mut handles = Vec::with_capacity(wthreads);
    for i in 0..wthreads {
        let pool = Arc::clone(pool);
        let targets = Arc::clone(&targets);
        let input = input.clone();
        handles.push(
            thread::Builder::new()
                .name(format!("index-{i}"))
                .spawn(move || -> anyhow::Result<()> {
                    loop {
                        let oid = {
                            let mut guard =
                                targets.lock().unwrap_or_else(PoisonError::into_inner);
                            guard.pop()
                        };
                        let Some(oid) = oid else { break };
                        info!(%oid, "building index");
                        pool.exec(&oid, CLASS_TABULAR, METHOD_BUILD_INDEX, input.clone())
                            .with_context(|| format!("build index for {oid}"))?;
                    }
                    Ok(())
                })
                .context("spawn index worker")?,
        );
    }

    let mut first_err = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
            Err(_) => {
                if first_err.is_none() {
                    first_err = Some(anyhow::anyhow!("index worker panicked"));
                }
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_traversal_reverses_for_back_pop() {
        let targets = ordered_targets(3, Traversal::Forward);
        // Popping from the back must yield obj.0 first.
        assert_eq!(targets, vec!["obj.2", "obj.1", "obj.0"]);
        let targets = ordered_targets(3, Traversal::Backward);
        assert_eq!(targets, vec!["obj.0", "obj.1", "obj.2"]);
    }

    #[test]
    fn price_queries_require_threshold_and_no_index() {
        let mut params = QueryParams {
            extended_price: 10.0,
            ..QueryParams::default()
        };
        assert!(resolve_query("a", &params).is_ok());
        assert!(resolve_query("b", &params).is_ok());
        assert!(resolve_query("c", &params).is_ok());

        params.use_index = true;
        assert!(resolve_query("a", &params).is_err());

        params.use_index = false;
        params.extended_price = 0.0;
        assert!(resolve_query("b", &params).is_err());
    }

    #[test]
    fn key_query_index_requires_pushdown() {
        let mut params = QueryParams {
            order_key: 5,
            line_number: 1,
            use_index: true,
            ..QueryParams::default()
        };
        assert!(resolve_query("d", &params).is_err());
        params.use_cls = true;
        assert!(resolve_query("d", &params).is_ok());
        params.order_key = 0;
        assert!(resolve_query("d", &params).is_err());
    }

    #[test]
    fn range_query_requires_all_bounds() {
        let full = QueryParams {
            ship_date_low: 100,
            ship_date_high: 200,
            discount_low: 0.05,
            discount_high: 0.08,
            quantity: 30.0,
            ..QueryParams::default()
        };
        assert!(resolve_query("e", &full).is_ok());

        let mut missing = full.clone();
        missing.discount_high = -9999.0;
        assert!(resolve_query("e", &missing).is_err());
        let mut missing = full;
        missing.quantity = 0.0;
        assert!(resolve_query("e", &missing).is_err());
    }

    #[test]
    fn regex_query_rejects_empty_and_invalid_patterns() {
        let mut params = QueryParams::default();
        assert!(resolve_query("f", &params).is_err());
        params.comment_regex = "[".to_string();
        assert!(resolve_query("f", &params).is_err());
        params.comment_regex = "fox".to_string();
        assert!(resolve_query("f", &params).is_ok());
    }

    #[test]
    fn fastpath_forbids_index_and_projection() {
        let mut params = QueryParams {
            projection: true,
            ..QueryParams::default()
        };
        assert!(resolve_query("fastpath", &params).is_err());
        params.projection = false;
        params.use_index = true;
        assert!(resolve_query("fastpath", &params).is_err());
        params.use_index = false;
        assert!(resolve_query("fastpath", &params).is_ok());
    }

    #[test]
    fn structured_star_sets_fastpath_and_csv_sets_projection() {
        let params = QueryParams::default();
        let (query, flags) = resolve_query("flatbuf", &params).unwrap();
        assert!(flags.fastpath);
        assert!(!flags.projection);
        assert!(query.is_structured());

        let params = QueryParams {
            project_col_names: "order_key,line_number".to_string(),
            ..QueryParams::default()
        };
        let (query, flags) = resolve_query("flatbuf", &params).unwrap();
        assert!(!flags.fastpath);
        assert!(flags.projection);
        let QuerySpec::Structured { query_schema, .. } = query else {
            panic!("expected structured query");
        };
        let schema = Schema::parse(&query_schema).unwrap();
        assert_eq!(schema.names_csv(), "order_key,line_number");
    }

    #[test]
    fn unknown_query_is_rejected() {
        assert!(resolve_query("g", &QueryParams::default()).is_err());
    }

    #[test]
    fn count_pushdown_prints_minus_one_rows_returned() {
        let summary = RunSummary {
            result_count: 1,
            rows_returned: 0,
            nrows_processed: 10,
            timings: Vec::new(),
            max_in_flight: 1,
        };
        let query = QuerySpec::CountGreater {
            extended_price: 75.0,
        };
        let flags = ExecFlags {
            use_server_side: true,
            ..ExecFlags::default()
        };
        assert_eq!(
            summary.total_line(&query, flags),
            "total result row count: 1 / -1; nrows_processed=10"
        );
        let flags = ExecFlags::default();
        assert_eq!(
            summary.total_line(&query, flags),
            "total result row count: 1 / 0; nrows_processed=10"
        );
    }
}
