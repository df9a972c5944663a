//! Fixed-layout lineitem rows.
//!
//! Records are packed with no alignment padding, so every field read is
//! an unaligned little-endian load done by copying into a local array.
//! The projected layout is produced only by server-side projection and
//! carries just `(order_key, line_number)`.

use crate::DecodeError;

/// Stride of a full fixed-layout record.
pub const FULL_STRIDE: usize = 141;
/// Stride of a server-projected `(order_key, line_number)` record.
pub const PROJECTED_STRIDE: usize = 8;

const ORDER_KEY_OFFSET: usize = 0;
const LINE_NUMBER_OFFSET: usize = 12;
const QUANTITY_OFFSET: usize = 16;
const EXTENDED_PRICE_OFFSET: usize = 24;
const DISCOUNT_OFFSET: usize = 32;
const SHIP_DATE_OFFSET: usize = 50;
const COMMENT_OFFSET: usize = 97;
const COMMENT_LEN: usize = 44;

const PROJECTED_LINE_NUMBER_OFFSET: usize = 4;

/// Which fixed layout a payload uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowLayout {
    Full,
    Projected,
}

impl RowLayout {
    pub fn stride(self) -> usize {
        match self {
            RowLayout::Full => FULL_STRIDE,
            RowLayout::Projected => PROJECTED_STRIDE,
        }
    }

    pub fn projected(self) -> bool {
        matches!(self, RowLayout::Projected)
    }
}

/// Borrowed view over one record. No allocation, no copies beyond the
/// per-field load.
#[derive(Clone, Copy)]
pub struct RowView<'a> {
    bytes: &'a [u8],
    layout: RowLayout,
}

/// Number of whole rows in `blob`, failing if the payload length is not
/// a stride multiple.
pub fn row_count(blob: &[u8], layout: RowLayout) -> Result<usize, DecodeError> {
    let stride = layout.stride();
    if blob.len() % stride != 0 {
        return Err(DecodeError::TruncatedRows {
            len: blob.len(),
            stride,
        });
    }
    Ok(blob.len() / stride)
}

/// View of row `i`. Callers stay within the bound returned by
/// [`row_count`].
pub fn row(blob: &[u8], layout: RowLayout, i: usize) -> RowView<'_> {
    let stride = layout.stride();
    RowView {
        bytes: &blob[i * stride..(i + 1) * stride],
        layout,
    }
}

impl<'a> RowView<'a> {
    pub fn layout(&self) -> RowLayout {
        self.layout
    }

    pub fn order_key(&self) -> i32 {
        load_i32(self.bytes, ORDER_KEY_OFFSET)
    }

    pub fn line_number(&self) -> i32 {
        match self.layout {
            RowLayout::Full => load_i32(self.bytes, LINE_NUMBER_OFFSET),
            RowLayout::Projected => load_i32(self.bytes, PROJECTED_LINE_NUMBER_OFFSET),
        }
    }

    pub fn quantity(&self) -> f64 {
        debug_assert_eq!(self.layout, RowLayout::Full);
        load_f64(self.bytes, QUANTITY_OFFSET)
    }

    pub fn extended_price(&self) -> f64 {
        debug_assert_eq!(self.layout, RowLayout::Full);
        load_f64(self.bytes, EXTENDED_PRICE_OFFSET)
    }

    pub fn discount(&self) -> f64 {
        debug_assert_eq!(self.layout, RowLayout::Full);
        load_f64(self.bytes, DISCOUNT_OFFSET)
    }

    pub fn ship_date(&self) -> i32 {
        debug_assert_eq!(self.layout, RowLayout::Full);
        load_i32(self.bytes, SHIP_DATE_OFFSET)
    }

    /// Comment bytes up to the first NUL within the 44-byte slot.
    pub fn comment_bytes(&self) -> &'a [u8] {
        debug_assert_eq!(self.layout, RowLayout::Full);
        let slot = &self.bytes[COMMENT_OFFSET..COMMENT_OFFSET + COMMENT_LEN];
        match slot.iter().position(|&b| b == 0) {
            Some(nul) => &slot[..nul],
            None => slot,
        }
    }

    pub fn comment_lossy(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.comment_bytes())
    }
}

fn load_i32(row: &[u8], off: usize) -> i32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&row[off..off + 4]);
    i32::from_le_bytes(b)
}

fn load_f64(row: &[u8], off: usize) -> f64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&row[off..off + 8]);
    f64::from_le_bytes(b)
}

/// Owned row used to build fixed-layout payloads (loaders and test
/// fixtures). Comments longer than the 44-byte slot are truncated.
#[derive(Clone, Debug, Default)]
pub struct LineitemRow {
    pub order_key: i32,
    pub line_number: i32,
    pub quantity: f64,
    pub extended_price: f64,
    pub discount: f64,
    pub ship_date: i32,
    pub comment: String,
}

impl LineitemRow {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let base = out.len();
        out.resize(base + FULL_STRIDE, 0);
        let rec = &mut out[base..base + FULL_STRIDE];
        rec[ORDER_KEY_OFFSET..ORDER_KEY_OFFSET + 4].copy_from_slice(&self.order_key.to_le_bytes());
        rec[LINE_NUMBER_OFFSET..LINE_NUMBER_OFFSET + 4]
            .copy_from_slice(&self.line_number.to_le_bytes());
        rec[QUANTITY_OFFSET..QUANTITY_OFFSET + 8].copy_from_slice(&self.quantity.to_le_bytes());
        rec[EXTENDED_PRICE_OFFSET..EXTENDED_PRICE_OFFSET + 8]
            .copy_from_slice(&self.extended_price.to_le_bytes());
        rec[DISCOUNT_OFFSET..DISCOUNT_OFFSET + 8].copy_from_slice(&self.discount.to_le_bytes());
        rec[SHIP_DATE_OFFSET..SHIP_DATE_OFFSET + 4].copy_from_slice(&self.ship_date.to_le_bytes());
        let comment = self.comment.as_bytes();
        let n = comment.len().min(COMMENT_LEN);
        rec[COMMENT_OFFSET..COMMENT_OFFSET + n].copy_from_slice(&comment[..n]);
    }
}

/// Encode a slice of rows into one contiguous full-layout payload.
pub fn encode_rows(rows: &[LineitemRow]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows.len() * FULL_STRIDE);
    for r in rows {
        r.encode_into(&mut out);
    }
    out
}

/// Append one projected `(order_key, line_number)` record.
pub fn write_projected_row(out: &mut Vec<u8>, order_key: i32, line_number: i32) {
    out.extend_from_slice(&order_key.to_le_bytes());
    out.extend_from_slice(&line_number.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LineitemRow {
        LineitemRow {
            order_key: 7,
            line_number: 3,
            quantity: 17.0,
            extended_price: 1234.5,
            discount: 0.06,
            ship_date: 9125,
            comment: "quick brown fox".to_string(),
        }
    }

    #[test]
    fn full_layout_fields_round_trip() {
        let blob = encode_rows(&[sample(), sample()]);
        assert_eq!(row_count(&blob, RowLayout::Full).unwrap(), 2);
        let r = row(&blob, RowLayout::Full, 1);
        assert_eq!(r.order_key(), 7);
        assert_eq!(r.line_number(), 3);
        assert_eq!(r.quantity(), 17.0);
        assert_eq!(r.extended_price(), 1234.5);
        assert_eq!(r.discount(), 0.06);
        assert_eq!(r.ship_date(), 9125);
        assert_eq!(r.comment_lossy(), "quick brown fox");
    }

    #[test]
    fn projected_layout_reads_line_number_at_offset_4() {
        let mut blob = Vec::new();
        write_projected_row(&mut blob, 42, 9);
        let r = row(&blob, RowLayout::Projected, 0);
        assert_eq!(r.order_key(), 42);
        assert_eq!(r.line_number(), 9);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut blob = encode_rows(&[sample()]);
        blob.pop();
        let err = row_count(&blob, RowLayout::Full).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedRows { stride: 141, .. }));
    }

    #[test]
    fn comment_without_nul_uses_full_slot() {
        let mut r = sample();
        r.comment = "x".repeat(60);
        let blob = encode_rows(&[r]);
        let v = row(&blob, RowLayout::Full, 0);
        assert_eq!(v.comment_bytes().len(), 44);
    }
}
