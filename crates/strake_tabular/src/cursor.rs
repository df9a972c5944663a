//! Offset-cursor helpers for the hand-rolled little-endian codecs.

use crate::DecodeError;

fn need(buf: &[u8], offset: usize, n: usize, what: &'static str) -> Result<(), DecodeError> {
    if offset.saturating_add(n) > buf.len() {
        return Err(DecodeError::ShortBuffer {
            what,
            need: n,
            have: buf.len().saturating_sub(offset),
        });
    }
    Ok(())
}

pub(crate) fn read_u8_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<u8, DecodeError> {
    need(buf, *offset, 1, what)?;
    let v = buf[*offset];
    *offset += 1;
    Ok(v)
}

pub(crate) fn read_u16_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<u16, DecodeError> {
    need(buf, *offset, 2, what)?;
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[*offset..*offset + 2]);
    *offset += 2;
    Ok(u16::from_le_bytes(b))
}

pub(crate) fn read_u32_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<u32, DecodeError> {
    need(buf, *offset, 4, what)?;
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[*offset..*offset + 4]);
    *offset += 4;
    Ok(u32::from_le_bytes(b))
}

pub(crate) fn read_u64_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<u64, DecodeError> {
    need(buf, *offset, 8, what)?;
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[*offset..*offset + 8]);
    *offset += 8;
    Ok(u64::from_le_bytes(b))
}

pub(crate) fn read_i32_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<i32, DecodeError> {
    read_u32_at(buf, offset, what).map(|v| v as i32)
}

pub(crate) fn read_i64_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<i64, DecodeError> {
    read_u64_at(buf, offset, what).map(|v| v as i64)
}

pub(crate) fn read_f64_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<f64, DecodeError> {
    read_u64_at(buf, offset, what).map(f64::from_bits)
}

pub(crate) fn take_at<'a>(
    buf: &'a [u8],
    offset: &mut usize,
    n: usize,
    what: &'static str,
) -> Result<&'a [u8], DecodeError> {
    need(buf, *offset, n, what)?;
    let out = &buf[*offset..*offset + n];
    *offset += n;
    Ok(out)
}

/// Read a u32-length-prefixed UTF-8 string (lossy on invalid bytes).
pub(crate) fn read_str_at(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<String, DecodeError> {
    let len = read_u32_at(buf, offset, what)? as usize;
    let bytes = take_at(buf, offset, len, what)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Write a u32-length-prefixed string.
pub(crate) fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}
