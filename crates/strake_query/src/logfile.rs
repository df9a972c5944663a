//! Per-object timing log, CSV, truncated on open.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;

use crate::mailbox::Timing;

/// Write one CSV row per evaluated object, in completion order.
pub fn write_log(path: &Path, timings: &[Timing]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("open log file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "dispatch,response,read_ns,eval_ns,eval2_ns")
        .with_context(|| format!("write log file {}", path.display()))?;
    for t in timings {
        writeln!(
            out,
            "{},{},{},{},{}",
            t.dispatch, t.response, t.read_ns, t.eval_ns, t.eval2_ns
        )
        .with_context(|| format!("write log file {}", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("flush log file {}", path.display()))
}
