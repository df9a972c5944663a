//! Tabular data primitives shared by the Strake query client and the
//! storage-side execution path: the column schema grammar, the fixed
//! lineitem row layout, self-describing row buffers and their framed
//! stream encoding, query specifications, and the wire codecs for the
//! pushdown protocol.

pub mod query;
pub mod row;
pub mod schema;
pub mod sdb;
pub mod wire;

mod cursor;

pub use query::{ExecFlags, QuerySpec};
pub use row::{RowLayout, RowView};
pub use schema::{ColType, ColumnDesc, Schema, SchemaError};

use thiserror::Error;

/// Failures while encoding or decoding row payloads, buffers, or wire
/// messages.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame length {len} overruns the remaining {remaining} bytes")]
    MalformedFrame { len: usize, remaining: usize },
    #[error("payload of {len} bytes is not a multiple of the {stride}-byte row stride")]
    TruncatedRows { len: usize, stride: usize },
    #[error("short buffer while reading {what}: need {need} bytes, {have} left")]
    ShortBuffer {
        what: &'static str,
        need: usize,
        have: usize,
    },
    #[error("unknown query tag {0}")]
    UnknownQueryTag(u8),
    #[error("unknown column type code {0}")]
    UnknownColType(u32),
    #[error("text field of {len} bytes exceeds the u16 length prefix")]
    TextTooLong { len: usize },
    #[error("value for column {col} does not match its declared type")]
    ValueTypeMismatch { col: String },
}

/// Combined error for operations that touch both schemas and payloads,
/// such as the buffer projection transform.
#[derive(Debug, Error)]
pub enum TabularError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
