//! Wire codecs for the pushdown protocol.
//!
//! Everything is hand-rolled little-endian: the serialized query op sent
//! to the storage-side `query_op` method, the stats prefix on every
//! pushdown response, and the small inputs of the auxiliary methods.

use crate::cursor::{read_str_at, read_u32_at, read_u64_at, read_u8_at, write_str};
use crate::query::{ExecFlags, QuerySpec};
use crate::{DecodeError, TabularError};

/// Storage class hosting the remote methods.
pub const CLASS_TABULAR: &str = "tabular";
/// Remote method executing a serialized query op against one object.
pub const METHOD_QUERY_OP: &str = "query_op";
/// Remote method building the key index sidecar for one object.
pub const METHOD_BUILD_INDEX: &str = "build_index";
/// Latent debugging hook: spin the storage side without returning data.
/// Nothing on the query path invokes it.
pub const METHOD_TEST_PAR: &str = "test_par";

const TAG_COUNT_GREATER: u8 = 1;
const TAG_SELECT_GREATER: u8 = 2;
const TAG_SELECT_EQUAL: u8 = 3;
const TAG_SELECT_BY_KEY: u8 = 4;
const TAG_SELECT_RANGE: u8 = 5;
const TAG_SELECT_REGEX: u8 = 6;
const TAG_SELECT_ALL: u8 = 7;
const TAG_STRUCTURED: u8 = 8;

fn tag_of(query: &QuerySpec) -> u8 {
    match query {
        QuerySpec::CountGreater { .. } => TAG_COUNT_GREATER,
        QuerySpec::SelectGreater { .. } => TAG_SELECT_GREATER,
        QuerySpec::SelectEqual { .. } => TAG_SELECT_EQUAL,
        QuerySpec::SelectByKey { .. } => TAG_SELECT_BY_KEY,
        QuerySpec::SelectRange { .. } => TAG_SELECT_RANGE,
        QuerySpec::SelectRegex { .. } => TAG_SELECT_REGEX,
        QuerySpec::SelectAll => TAG_SELECT_ALL,
        QuerySpec::Structured { .. } => TAG_STRUCTURED,
    }
}

/// Serialize a query op. Every field is always present; shapes that do
/// not use a parameter carry its zero/empty value.
pub fn encode_query_op(out: &mut Vec<u8>, query: &QuerySpec, flags: ExecFlags) {
    let mut extended_price = 0.0f64;
    let mut order_key = 0i32;
    let mut line_number = 0i32;
    let mut ship_date_low = 0i32;
    let mut ship_date_high = 0i32;
    let mut discount_low = 0.0f64;
    let mut discount_high = 0.0f64;
    let mut quantity = 0.0f64;
    let mut comment_regex = "";
    let mut table_schema = "";
    let mut query_schema = "";

    match query {
        QuerySpec::CountGreater { extended_price: t }
        | QuerySpec::SelectGreater { extended_price: t }
        | QuerySpec::SelectEqual { extended_price: t } => extended_price = *t,
        QuerySpec::SelectByKey {
            order_key: k,
            line_number: n,
        } => {
            order_key = *k;
            line_number = *n;
        }
        QuerySpec::SelectRange {
            ship_date_low: a,
            ship_date_high: b,
            discount_low: c,
            discount_high: d,
            quantity: q,
        } => {
            ship_date_low = *a;
            ship_date_high = *b;
            discount_low = *c;
            discount_high = *d;
            quantity = *q;
        }
        QuerySpec::SelectRegex { pattern } => comment_regex = pattern,
        QuerySpec::SelectAll => {}
        QuerySpec::Structured {
            table_schema: t,
            query_schema: q,
        } => {
            table_schema = t;
            query_schema = q;
        }
    }

    out.push(tag_of(query));
    out.extend_from_slice(&extended_price.to_le_bytes());
    out.extend_from_slice(&order_key.to_le_bytes());
    out.extend_from_slice(&line_number.to_le_bytes());
    out.extend_from_slice(&ship_date_low.to_le_bytes());
    out.extend_from_slice(&ship_date_high.to_le_bytes());
    out.extend_from_slice(&discount_low.to_le_bytes());
    out.extend_from_slice(&discount_high.to_le_bytes());
    out.extend_from_slice(&quantity.to_le_bytes());
    write_str(out, comment_regex);
    write_str(out, table_schema);
    write_str(out, query_schema);
    out.push(flags.use_index as u8);
    out.push(flags.projection as u8);
    out.push(flags.fastpath as u8);
    out.extend_from_slice(&flags.extra_row_cost.to_le_bytes());
}

/// Decode a serialized query op back into its spec and flags.
pub fn decode_query_op(buf: &[u8]) -> Result<(QuerySpec, ExecFlags), TabularError> {
    let mut offset = 0usize;
    let tag = read_u8_at(buf, &mut offset, "query tag")?;
    let extended_price = read_f64(buf, &mut offset, "extended_price")?;
    let order_key = read_i32(buf, &mut offset, "order_key")?;
    let line_number = read_i32(buf, &mut offset, "line_number")?;
    let ship_date_low = read_i32(buf, &mut offset, "ship_date_low")?;
    let ship_date_high = read_i32(buf, &mut offset, "ship_date_high")?;
    let discount_low = read_f64(buf, &mut offset, "discount_low")?;
    let discount_high = read_f64(buf, &mut offset, "discount_high")?;
    let quantity = read_f64(buf, &mut offset, "quantity")?;
    let comment_regex = read_str_at(buf, &mut offset, "comment_regex")?;
    let table_schema = read_str_at(buf, &mut offset, "table_schema")?;
    let query_schema = read_str_at(buf, &mut offset, "query_schema")?;
    let use_index = read_u8_at(buf, &mut offset, "use_index")? != 0;
    let projection = read_u8_at(buf, &mut offset, "projection")? != 0;
    let fastpath = read_u8_at(buf, &mut offset, "fastpath")? != 0;
    let extra_row_cost = read_u64_at(buf, &mut offset, "extra_row_cost")?;

    let query = match tag {
        TAG_COUNT_GREATER => QuerySpec::CountGreater { extended_price },
        TAG_SELECT_GREATER => QuerySpec::SelectGreater { extended_price },
        TAG_SELECT_EQUAL => QuerySpec::SelectEqual { extended_price },
        TAG_SELECT_BY_KEY => QuerySpec::SelectByKey {
            order_key,
            line_number,
        },
        TAG_SELECT_RANGE => QuerySpec::SelectRange {
            ship_date_low,
            ship_date_high,
            discount_low,
            discount_high,
            quantity,
        },
        TAG_SELECT_REGEX => QuerySpec::SelectRegex {
            pattern: comment_regex,
        },
        TAG_SELECT_ALL => QuerySpec::SelectAll,
        TAG_STRUCTURED => QuerySpec::Structured {
            table_schema,
            query_schema,
        },
        other => return Err(DecodeError::UnknownQueryTag(other).into()),
    };
    let flags = ExecFlags {
        use_server_side: true,
        use_index,
        projection,
        fastpath,
        extra_row_cost,
    };
    Ok((query, flags))
}

fn read_i32(buf: &[u8], offset: &mut usize, what: &'static str) -> Result<i32, DecodeError> {
    crate::cursor::read_i32_at(buf, offset, what)
}

fn read_f64(buf: &[u8], offset: &mut usize, what: &'static str) -> Result<f64, DecodeError> {
    crate::cursor::read_f64_at(buf, offset, what)
}

/// Stats prefix carried by every pushdown response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushdownStats {
    pub read_ns: u64,
    pub eval_ns: u64,
    pub nrows_processed: u64,
}

pub fn encode_pushdown_prefix(out: &mut Vec<u8>, stats: &PushdownStats) {
    out.extend_from_slice(&stats.read_ns.to_le_bytes());
    out.extend_from_slice(&stats.eval_ns.to_le_bytes());
    out.extend_from_slice(&stats.nrows_processed.to_le_bytes());
}

/// Split a pushdown response into its stats prefix and the payload tail.
pub fn decode_pushdown_prefix(buf: &[u8]) -> Result<(PushdownStats, &[u8]), DecodeError> {
    let mut offset = 0usize;
    let read_ns = read_u64_at(buf, &mut offset, "pushdown read_ns")?;
    let eval_ns = read_u64_at(buf, &mut offset, "pushdown eval_ns")?;
    let nrows_processed = read_u64_at(buf, &mut offset, "pushdown nrows")?;
    Ok((
        PushdownStats {
            read_ns,
            eval_ns,
            nrows_processed,
        },
        &buf[offset..],
    ))
}

/// Wrap a framed-buffer stream for the structured-query response tail.
pub fn encode_wrapped_stream(out: &mut Vec<u8>, stream: &[u8]) {
    out.extend_from_slice(&(stream.len() as u32).to_le_bytes());
    out.extend_from_slice(stream);
}

/// Unwrap the framed-buffer stream from a structured-query response tail.
pub fn decode_wrapped_stream(buf: &[u8]) -> Result<&[u8], DecodeError> {
    let mut offset = 0usize;
    let len = read_u32_at(buf, &mut offset, "wrapped stream length")? as usize;
    if len > buf.len() - offset {
        return Err(DecodeError::MalformedFrame {
            len,
            remaining: buf.len() - offset,
        });
    }
    Ok(&buf[offset..offset + len])
}

/// The matching-row count returned for `CountGreater` under pushdown.
pub fn encode_row_count(out: &mut Vec<u8>, count: u64) {
    out.extend_from_slice(&count.to_le_bytes());
}

pub fn decode_row_count(buf: &[u8]) -> Result<u64, DecodeError> {
    let mut offset = 0usize;
    read_u64_at(buf, &mut offset, "matching row count")
}

/// Input of the `build_index` method.
pub fn encode_build_index(batch_size: u32) -> Vec<u8> {
    batch_size.to_le_bytes().to_vec()
}

pub fn decode_build_index(buf: &[u8]) -> Result<u32, DecodeError> {
    let mut offset = 0usize;
    read_u32_at(buf, &mut offset, "build_index batch size")
}

/// Input of the `test_par` debugging hook.
pub fn encode_test_par(iters: u64, read: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&iters.to_le_bytes());
    out.push(read as u8);
    out
}

pub fn decode_test_par(buf: &[u8]) -> Result<(u64, bool), DecodeError> {
    let mut offset = 0usize;
    let iters = read_u64_at(buf, &mut offset, "test_par iters")?;
    let read = read_u8_at(buf, &mut offset, "test_par read flag")? != 0;
    Ok((iters, read))
}
