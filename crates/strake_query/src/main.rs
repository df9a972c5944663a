//! `strake-query`: run a pushdown query against every object of a
//! tabular storage pool and report result counts plus per-object
//! timings.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use strake_query::engine::{self, Engine, QueryParams, RunConfig, Traversal};
use strake_query::logfile;
use strake_query::store::{FsPool, ObjectPool};

#[derive(Parser, Debug)]
#[command(name = "strake-query", about = "Pushdown query client for tabular object pools")]
struct Args {
    /// Object pool to query (a directory of obj.N files).
    #[arg(long)]
    pool: String,

    /// Number of target objects, named obj.0 .. obj.N-1.
    #[arg(long = "num-objs")]
    num_objs: u32,

    /// Execute the query inside the storage side (pushdown).
    #[arg(long = "use-cls")]
    use_cls: bool,

    /// Suppress per-row output.
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Query name: a, b, c, d, e, f, fastpath, or flatbuf.
    #[arg(long)]
    query: String,

    /// Number of evaluator threads.
    #[arg(long, default_value_t = 1)]
    wthreads: usize,

    /// Maximum number of outstanding storage requests.
    #[arg(long, default_value_t = 1)]
    qdepth: u32,

    /// Build the key index for every object, then exit.
    #[arg(long = "build-index")]
    build_index: bool,

    /// Let the storage side resolve key queries through its index.
    #[arg(long = "use-index")]
    use_index: bool,

    /// Project fixed-row results down to (order_key, line_number).
    #[arg(long)]
    projection: bool,

    #[arg(long = "build-index-batch-size", default_value_t = 1000)]
    build_index_batch_size: u32,

    /// Busy-work cycles charged per matching row.
    #[arg(long = "extra-row-cost", default_value_t = 0)]
    extra_row_cost: u64,

    /// Write per-object timings to this CSV file.
    #[arg(long = "log-file", default_value = "")]
    log_file: String,

    /// Traversal order: fwd, bwd, or rnd.
    #[arg(long, default_value = "fwd")]
    dir: String,

    // Query parameters.
    #[arg(long = "extended-price", default_value_t = 0.0, allow_negative_numbers = true)]
    extended_price: f64,

    #[arg(long = "order-key", default_value_t = 0, allow_negative_numbers = true)]
    order_key: i32,

    #[arg(long = "line-number", default_value_t = 0, allow_negative_numbers = true)]
    line_number: i32,

    #[arg(long = "ship-date-low", default_value_t = -9999, allow_negative_numbers = true)]
    ship_date_low: i32,

    #[arg(long = "ship-date-high", default_value_t = -9999, allow_negative_numbers = true)]
    ship_date_high: i32,

    #[arg(long = "discount-low", default_value_t = -9999.0, allow_negative_numbers = true)]
    discount_low: f64,

    #[arg(long = "discount-high", default_value_t = -9999.0, allow_negative_numbers = true)]
    discount_high: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    quantity: f64,

    #[arg(long = "comment_regex", default_value = "")]
    comment_regex: String,

    /// Projected column names as a csv list; `*` selects every column.
    #[arg(long = "project-col-names", default_value = "*")]
    project_col_names: String,
}

fn main() {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Bad flags, missing required arguments, and help all leave
            // with exit code 1 (help is historical behavior, preserved).
            let _ = err.print();
            std::process::exit(1);
        }
    };

    if let Err(err) = run(args) {
        eprintln!("strake-query: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    anyhow::ensure!(args.num_objs > 0, "--num-objs must be > 0");
    anyhow::ensure!(args.wthreads > 0, "--wthreads must be > 0");
    anyhow::ensure!(args.qdepth > 0, "--qdepth must be > 0");

    let dir: Traversal = args.dir.parse()?;

    if args.build_index {
        let pool: Arc<dyn ObjectPool> = Arc::new(FsPool::open(&args.pool)?);
        let targets = engine::ordered_targets(args.num_objs, dir);
        return engine::run_build_index(
            &pool,
            targets,
            args.wthreads,
            args.build_index_batch_size,
        );
    }

    let params = QueryParams {
        extended_price: args.extended_price,
        order_key: args.order_key,
        line_number: args.line_number,
        ship_date_low: args.ship_date_low,
        ship_date_high: args.ship_date_high,
        discount_low: args.discount_low,
        discount_high: args.discount_high,
        quantity: args.quantity,
        comment_regex: args.comment_regex.clone(),
        project_col_names: args.project_col_names.clone(),
        use_cls: args.use_cls,
        use_index: args.use_index,
        projection: args.projection,
        extra_row_cost: args.extra_row_cost,
    };
    let (query, flags) = engine::resolve_query(&args.query, &params)?;

    // Config is known-good; only now touch the pool.
    let pool: Arc<dyn ObjectPool> = Arc::new(FsPool::open(&args.pool)?);

    let cfg = RunConfig {
        num_objs: args.num_objs,
        wthreads: args.wthreads,
        qdepth: args.qdepth,
        dir,
        quiet: args.quiet,
    };
    let engine = Engine::new(cfg, query.clone(), flags, pool)?;
    let summary = engine.run()?;

    println!("{}", summary.total_line(&query, flags));

    if !args.log_file.is_empty() {
        logfile::write_log(Path::new(&args.log_file), &summary.timings)?;
    }
    Ok(())
}
