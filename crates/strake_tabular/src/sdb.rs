//! Self-describing row buffers and the framed stream that carries them.
//!
//! An SDB is `[nrows: u32][schema_len: u32][schema bytes][row data]`,
//! all little-endian. Row data is row-major in schema order: `int32` is
//! 4 bytes, `int64` and `float64` are 8, `text` is a u16 length prefix
//! plus bytes. A framed stream is the concatenation of
//! `[len: u32][payload]` frames.

use crate::cursor::{
    read_f64_at, read_i32_at, read_i64_at, read_u16_at, read_u32_at, take_at,
};
use crate::schema::{ColType, Schema};
use crate::{DecodeError, TabularError};

use std::fmt;

/// One typed field value inside an SDB row.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Root header of a self-describing buffer. The embedded schema string
/// doubles as the schema tag.
#[derive(Clone, Debug, PartialEq)]
pub struct SdbHeader {
    pub nrows: u32,
    pub schema: String,
}

/// Split a buffer into its root header and the raw row bytes.
pub fn read_header(buf: &[u8]) -> Result<(SdbHeader, &[u8]), DecodeError> {
    let mut offset = 0usize;
    let nrows = read_u32_at(buf, &mut offset, "sdb nrows")?;
    let schema_len = read_u32_at(buf, &mut offset, "sdb schema length")? as usize;
    let schema = take_at(buf, &mut offset, schema_len, "sdb schema")?;
    Ok((
        SdbHeader {
            nrows,
            schema: String::from_utf8_lossy(schema).into_owned(),
        },
        &buf[offset..],
    ))
}

/// Encode rows under `schema` into a new buffer.
pub fn encode(schema: &Schema, rows: &[Vec<Value>]) -> Result<Vec<u8>, DecodeError> {
    let schema_str = schema.serialize();
    let mut out = Vec::new();
    out.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    out.extend_from_slice(&(schema_str.len() as u32).to_le_bytes());
    out.extend_from_slice(schema_str.as_bytes());
    for values in rows {
        for (col, value) in schema.cols().iter().zip(values) {
            match (col.ty, value) {
                (ColType::Int32, Value::Int32(v)) => out.extend_from_slice(&v.to_le_bytes()),
                (ColType::Int64, Value::Int64(v)) => out.extend_from_slice(&v.to_le_bytes()),
                (ColType::Float64, Value::Float64(v)) => out.extend_from_slice(&v.to_le_bytes()),
                (ColType::Text, Value::Text(v)) => {
                    if v.len() > u16::MAX as usize {
                        return Err(DecodeError::TextTooLong { len: v.len() });
                    }
                    out.extend_from_slice(&(v.len() as u16).to_le_bytes());
                    out.extend_from_slice(v.as_bytes());
                }
                _ => {
                    return Err(DecodeError::ValueTypeMismatch {
                        col: col.name.clone(),
                    })
                }
            }
        }
    }
    Ok(out)
}

/// Decode `nrows` rows of `row_bytes` under `schema`.
pub fn decode_rows(
    schema: &Schema,
    nrows: u32,
    row_bytes: &[u8],
) -> Result<Vec<Vec<Value>>, DecodeError> {
    let mut offset = 0usize;
    let mut rows = Vec::with_capacity(nrows as usize);
    for _ in 0..nrows {
        let mut values = Vec::with_capacity(schema.len());
        for col in schema.cols() {
            let value = match col.ty {
                ColType::Int32 => Value::Int32(read_i32_at(row_bytes, &mut offset, "sdb int32")?),
                ColType::Int64 => Value::Int64(read_i64_at(row_bytes, &mut offset, "sdb int64")?),
                ColType::Float64 => {
                    Value::Float64(read_f64_at(row_bytes, &mut offset, "sdb float64")?)
                }
                ColType::Text => {
                    let len = read_u16_at(row_bytes, &mut offset, "sdb text length")? as usize;
                    let bytes = take_at(row_bytes, &mut offset, len, "sdb text")?;
                    Value::Text(String::from_utf8_lossy(bytes).into_owned())
                }
            };
            values.push(value);
        }
        rows.push(values);
    }
    Ok(rows)
}

/// Re-encode a buffer keeping only the `query_schema` columns, in
/// `query_schema` order. Rows are decoded under `table_schema`; the
/// output buffer embeds `query_schema`.
pub fn transform(
    table_schema: &Schema,
    query_schema: &Schema,
    buf: &[u8],
) -> Result<Vec<u8>, TabularError> {
    let (header, row_bytes) = read_header(buf)?;
    let rows = decode_rows(table_schema, header.nrows, row_bytes)?;

    // Map each output column to its position in the table schema.
    let mut positions = Vec::with_capacity(query_schema.len());
    for col in query_schema.cols() {
        let pos = table_schema
            .cols()
            .iter()
            .position(|c| c.name == col.name)
            .ok_or_else(|| crate::SchemaError::UnknownColumn {
                name: col.name.clone(),
            })?;
        positions.push(pos);
    }

    let projected: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| positions.iter().map(|&p| row[p].clone()).collect())
        .collect();
    Ok(encode(query_schema, &projected)?)
}

/// Append one `[len][payload]` frame to a stream.
pub fn write_frame(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Lazy cursor over the frames of a stream. Restart by constructing a
/// new cursor over the same bytes.
pub struct FrameCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for FrameCursor<'a> {
    type Item = Result<&'a [u8], DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let mut offset = self.pos;
        let len = match read_u32_at(self.buf, &mut offset, "frame length") {
            Ok(len) => len as usize,
            Err(err) => {
                self.pos = self.buf.len();
                return Some(Err(err));
            }
        };
        if len > self.buf.len() - offset {
            self.pos = self.buf.len();
            return Some(Err(DecodeError::MalformedFrame {
                len,
                remaining: self.buf.len() - offset,
            }));
        }
        let frame = &self.buf[offset..offset + len];
        self.pos = offset + len;
        Some(Ok(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LINEITEM_SCHEMA;

    fn two_col_schema() -> Schema {
        Schema::parse("0 1 1 0 order_key\n1 4 0 0 comment").unwrap()
    }

    fn sample_rows() -> Vec<Vec<Value>> {
        vec![
            vec![Value::Int32(1), Value::Text("alpha".to_string())],
            vec![Value::Int32(2), Value::Text("beta".to_string())],
        ]
    }

    #[test]
    fn encode_decode_round_trips() {
        let schema = two_col_schema();
        let buf = encode(&schema, &sample_rows()).unwrap();
        let (header, row_bytes) = read_header(&buf).unwrap();
        assert_eq!(header.nrows, 2);
        assert_eq!(header.schema, schema.serialize());
        let rows = decode_rows(&schema, header.nrows, row_bytes).unwrap();
        assert_eq!(rows, sample_rows());
    }

    #[test]
    fn encode_rejects_type_mismatch() {
        let schema = two_col_schema();
        let rows = vec![vec![Value::Float64(1.0), Value::Text("x".to_string())]];
        assert!(matches!(
            encode(&schema, &rows),
            Err(DecodeError::ValueTypeMismatch { .. })
        ));
    }

    #[test]
    fn transform_projects_in_query_order() {
        let table = Schema::parse(LINEITEM_SCHEMA).unwrap();
        let query = table.project("line_number,order_key").unwrap();
        let rows = vec![vec![
            Value::Int32(11),
            Value::Int32(4),
            Value::Float64(1.0),
            Value::Float64(2.0),
            Value::Float64(0.01),
            Value::Int32(100),
            Value::Text("c".to_string()),
        ]];
        let buf = encode(&table, &rows).unwrap();
        let out = transform(&table, &query, &buf).unwrap();
        let (header, row_bytes) = read_header(&out).unwrap();
        assert_eq!(header.nrows, 1);
        assert_eq!(header.schema, query.serialize());
        let out_rows = decode_rows(&query, 1, row_bytes).unwrap();
        assert_eq!(out_rows, vec![vec![Value::Int32(4), Value::Int32(11)]]);
    }

    #[test]
    fn frame_cursor_walks_frames_in_order() {
        let mut stream = Vec::new();
        write_frame(&mut stream, b"one");
        write_frame(&mut stream, b"");
        write_frame(&mut stream, b"three");
        let frames: Vec<_> = FrameCursor::new(&stream).collect::<Result<_, _>>().unwrap();
        assert_eq!(frames, vec![&b"one"[..], &b""[..], &b"three"[..]]);
    }

    #[test]
    fn frame_cursor_rejects_overrunning_prefix() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&100u32.to_le_bytes());
        stream.extend_from_slice(b"short");
        let mut cursor = FrameCursor::new(&stream);
        assert!(matches!(
            cursor.next(),
            Some(Err(DecodeError::MalformedFrame { len: 100, .. }))
        ));
        assert!(cursor.next().is_none());
    }
}
