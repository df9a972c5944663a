//! Shared helpers for integration tests: fixture objects in a temp
//! pool directory and a one-call query runner.
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use strake_query::engine::{resolve_query, Engine, QueryParams, RunConfig, RunSummary, Traversal};
use strake_query::store::{FsPool, ObjectPool};
use strake_tabular::row::{encode_rows, LineitemRow};
use strake_tabular::schema::LINEITEM_SCHEMA;
use strake_tabular::sdb::{self, Value};
use strake_tabular::{ExecFlags, QuerySpec, Schema};

/// Write a fixed-layout object into the pool directory.
pub fn write_fixed_object(dir: &Path, oid: &str, rows: &[LineitemRow]) {
    fs::write(dir.join(oid), encode_rows(rows)).unwrap();
}

/// Write a framed-buffer object; each entry becomes one frame.
pub fn write_framed_object(dir: &Path, oid: &str, frames: &[Vec<Vec<Value>>]) {
    let schema = Schema::parse(LINEITEM_SCHEMA).unwrap();
    let mut stream = Vec::new();
    for rows in frames {
        let buf = sdb::encode(&schema, rows).unwrap();
        sdb::write_frame(&mut stream, &buf);
    }
    fs::write(dir.join(oid), stream).unwrap();
}

/// A full lineitem row as SDB values.
pub fn lineitem_values(order_key: i32, line_number: i32) -> Vec<Value> {
    vec![
        Value::Int32(order_key),
        Value::Int32(line_number),
        Value::Float64(10.0),
        Value::Float64(100.0),
        Value::Float64(0.05),
        Value::Int32(150),
        Value::Text(format!("row {order_key}/{line_number}")),
    ]
}

/// Ten rows where only row 3 crosses the 75.0 price threshold.
pub fn ten_rows() -> Vec<LineitemRow> {
    (0..10)
        .map(|i| LineitemRow {
            order_key: i + 1,
            line_number: 1,
            extended_price: if i == 3 { 100.0 } else { 50.0 },
            quantity: 5.0,
            discount: 0.02,
            ship_date: 50,
            comment: format!("row {i}"),
        })
        .collect()
}

/// A spread of rows exercising every predicate at least once.
pub fn varied_rows() -> Vec<LineitemRow> {
    let comments = [
        "quick brown fox",
        "lazy dog",
        "brown paper",
        "plain",
        "fox again",
        "nothing",
    ];
    (0..12)
        .map(|i| LineitemRow {
            order_key: i + 1,
            line_number: (i % 3) + 1,
            quantity: 10.0 + f64::from(i) * 3.0,
            extended_price: 40.0 + f64::from(i) * 12.0,
            discount: 0.03 + f64::from(i) * 0.005,
            ship_date: 80 + i * 15,
            comment: comments[i as usize % comments.len()].to_string(),
        })
        .collect()
}

pub fn run_with(
    dir: &Path,
    query_name: &str,
    params: &QueryParams,
    num_objs: u32,
    wthreads: usize,
    qdepth: u32,
    traversal: Traversal,
) -> (RunSummary, QuerySpec, ExecFlags) {
    let pool: Arc<dyn ObjectPool> = Arc::new(FsPool::open(dir).unwrap());
    let (query, flags) = resolve_query(query_name, params).unwrap();
    let cfg = RunConfig {
        num_objs,
        wthreads,
        qdepth,
        dir: traversal,
        quiet: true,
    };
    let engine = Engine::new(cfg, query.clone(), flags, pool).unwrap();
    let summary = engine.run().unwrap();
    (summary, query, flags)
}

/// Run one query over the pool with a single worker and unit queue
/// depth, returning the summary and the final stdout line.
pub fn run_query(
    dir: &Path,
    query_name: &str,
    params: &QueryParams,
    num_objs: u32,
) -> (RunSummary, String) {
    let (summary, query, flags) =
        run_with(dir, query_name, params, num_objs, 1, 1, Traversal::Forward);
    let line = summary.total_line(&query, flags);
    (summary, line)
}
