//! Column schema grammar and projection.
//!
//! A schema string is one column descriptor per line:
//!
//! ```text
//! <index> <type> <is_key> <nullable> <name>
//! ```
//!
//! with `type` one of `1` (int32), `2` (int64), `3` (float64), `4` (text).
//! `serialize` is the exact inverse of `parse` for canonical strings
//! (single spaces, no trailing newline).

use thiserror::Error;

/// The built-in lineitem table schema, column order matching the fixed
/// row layout.
pub const LINEITEM_SCHEMA: &str = "\
0 1 1 0 order_key
1 1 1 0 line_number
2 3 0 0 quantity
3 3 0 0 extended_price
4 3 0 0 discount
5 1 0 0 ship_date
6 4 0 0 comment";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema string has no column descriptors")]
    Empty,
    #[error("bad column descriptor on line {line}: {detail}")]
    BadDescriptor { line: usize, detail: String },
    #[error("unknown column {name:?} in projection list")]
    UnknownColumn { name: String },
}

/// Column value type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColType {
    Int32,
    Int64,
    Float64,
    Text,
}

impl ColType {
    pub fn code(self) -> u32 {
        match self {
            ColType::Int32 => 1,
            ColType::Int64 => 2,
            ColType::Float64 => 3,
            ColType::Text => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ColType::Int32),
            2 => Some(ColType::Int64),
            3 => Some(ColType::Float64),
            4 => Some(ColType::Text),
            _ => None,
        }
    }
}

/// One parsed column descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDesc {
    pub index: u32,
    pub ty: ColType,
    pub is_key: bool,
    pub nullable: bool,
    pub name: String,
}

/// An ordered list of column descriptors.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Schema {
    cols: Vec<ColumnDesc>,
}

impl Schema {
    /// Parse a schema string into descriptors.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        if s.trim().is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut cols = Vec::new();
        for (lineno, line) in s.split('\n').enumerate() {
            let line_display = lineno + 1;
            let mut it = line.split_whitespace();
            let (index, ty, is_key, nullable, name) = match (
                it.next(),
                it.next(),
                it.next(),
                it.next(),
                it.next(),
            ) {
                (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
                _ => {
                    return Err(SchemaError::BadDescriptor {
                        line: line_display,
                        detail: "expected 5 fields: index type is_key nullable name".to_string(),
                    })
                }
            };
            if it.next().is_some() {
                return Err(SchemaError::BadDescriptor {
                    line: line_display,
                    detail: "trailing fields after column name".to_string(),
                });
            }
            let index: u32 = index.parse().map_err(|_| SchemaError::BadDescriptor {
                line: line_display,
                detail: format!("bad column index {index:?}"),
            })?;
            let ty = ty
                .parse::<u32>()
                .ok()
                .and_then(ColType::from_code)
                .ok_or_else(|| SchemaError::BadDescriptor {
                    line: line_display,
                    detail: format!("bad column type {ty:?}"),
                })?;
            let is_key = parse_flag(is_key).ok_or_else(|| SchemaError::BadDescriptor {
                line: line_display,
                detail: format!("bad is_key flag {is_key:?}"),
            })?;
            let nullable = parse_flag(nullable).ok_or_else(|| SchemaError::BadDescriptor {
                line: line_display,
                detail: format!("bad nullable flag {nullable:?}"),
            })?;
            cols.push(ColumnDesc {
                index,
                ty,
                is_key,
                nullable,
                name: name.to_string(),
            });
        }
        Ok(Self { cols })
    }

    /// Serialize back to the canonical schema string. Inverse of `parse`.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (i, col) in self.cols.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!(
                "{} {} {} {} {}",
                col.index,
                col.ty.code(),
                col.is_key as u32,
                col.nullable as u32,
                col.name
            ));
        }
        out
    }

    /// Derive a projected sub-schema from a comma-separated column-name
    /// list, preserving the list order. Projected columns are re-indexed
    /// from zero.
    pub fn project(&self, names_csv: &str) -> Result<Self, SchemaError> {
        let mut cols = Vec::new();
        for name in names_csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let src = self
                .col(name)
                .ok_or_else(|| SchemaError::UnknownColumn {
                    name: name.to_string(),
                })?;
            cols.push(ColumnDesc {
                index: cols.len() as u32,
                ..src.clone()
            });
        }
        if cols.is_empty() {
            return Err(SchemaError::Empty);
        }
        Ok(Self { cols })
    }

    pub fn col(&self, name: &str) -> Option<&ColumnDesc> {
        self.cols.iter().find(|c| c.name == name)
    }

    pub fn cols(&self) -> &[ColumnDesc] {
        &self.cols
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Column names joined with commas, in declared order.
    pub fn names_csv(&self) -> String {
        self.cols
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serialize_round_trips() {
        let schema = Schema::parse(LINEITEM_SCHEMA).unwrap();
        assert_eq!(schema.len(), 7);
        assert_eq!(schema.serialize(), LINEITEM_SCHEMA);
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(Schema::parse(""), Err(SchemaError::Empty)));
        assert!(matches!(Schema::parse("   \n  "), Err(SchemaError::Empty)));
    }

    #[test]
    fn parse_rejects_bad_descriptor() {
        let err = Schema::parse("0 1 1 0").unwrap_err();
        assert!(matches!(err, SchemaError::BadDescriptor { line: 1, .. }));
        let err = Schema::parse("0 9 1 0 foo").unwrap_err();
        assert!(matches!(err, SchemaError::BadDescriptor { line: 1, .. }));
    }

    #[test]
    fn project_preserves_csv_order_and_reindexes() {
        let schema = Schema::parse(LINEITEM_SCHEMA).unwrap();
        let sub = schema.project("line_number, order_key").unwrap();
        assert_eq!(sub.cols()[0].name, "line_number");
        assert_eq!(sub.cols()[0].index, 0);
        assert_eq!(sub.cols()[1].name, "order_key");
        assert_eq!(sub.cols()[1].index, 1);
    }

    #[test]
    fn project_unknown_column_fails() {
        let schema = Schema::parse(LINEITEM_SCHEMA).unwrap();
        let err = schema.project("order_key,nope").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownColumn { name } if name == "nope"));
    }

    #[test]
    fn project_empty_list_fails() {
        let schema = Schema::parse(LINEITEM_SCHEMA).unwrap();
        assert!(matches!(schema.project(" , "), Err(SchemaError::Empty)));
    }
}
