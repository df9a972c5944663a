//! Query specifications and row predicates.
//!
//! The query is a closed sum type; the one-letter names (`a` .. `f`,
//! `fastpath`, `flatbuf`) exist only at the CLI surface. Predicates are
//! shared by the client-side evaluator and the storage-side execution
//! path so pushdown stays semantics-preserving.

use regex::Regex;

use crate::row::RowView;

/// One query shape with its scalar parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum QuerySpec {
    /// `select count(*) where extended_price > t` — "a"
    CountGreater { extended_price: f64 },
    /// `select * where extended_price > t` — "b"
    SelectGreater { extended_price: f64 },
    /// `select * where extended_price = t` — "c"
    SelectEqual { extended_price: f64 },
    /// `select * where order_key = k and line_number = n` — "d"
    SelectByKey { order_key: i32, line_number: i32 },
    /// Compound ship-date/discount/quantity range — "e"
    SelectRange {
        ship_date_low: i32,
        ship_date_high: i32,
        discount_low: f64,
        discount_high: f64,
        quantity: f64,
    },
    /// Partial regex match on the comment field — "f"
    SelectRegex { pattern: String },
    /// Unfiltered scan — "fastpath"
    SelectAll,
    /// Self-describing buffer query with optional projection — "flatbuf"
    Structured {
        table_schema: String,
        query_schema: String,
    },
}

/// Execution modifiers orthogonal to the query shape.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ExecFlags {
    pub use_server_side: bool,
    pub use_index: bool,
    pub projection: bool,
    pub fastpath: bool,
    pub extra_row_cost: u64,
}

impl QuerySpec {
    /// The historical CLI name of this query shape.
    pub fn cli_name(&self) -> &'static str {
        match self {
            QuerySpec::CountGreater { .. } => "a",
            QuerySpec::SelectGreater { .. } => "b",
            QuerySpec::SelectEqual { .. } => "c",
            QuerySpec::SelectByKey { .. } => "d",
            QuerySpec::SelectRange { .. } => "e",
            QuerySpec::SelectRegex { .. } => "f",
            QuerySpec::SelectAll => "fastpath",
            QuerySpec::Structured { .. } => "flatbuf",
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, QuerySpec::Structured { .. })
    }

    /// SQL-equivalent description printed when a run starts.
    pub fn describe(&self) -> String {
        match self {
            QuerySpec::CountGreater { extended_price } => format!(
                "select count(*) from lineitem where l_extendedprice > {extended_price}"
            ),
            QuerySpec::SelectGreater { extended_price } => {
                format!("select * from lineitem where l_extendedprice > {extended_price}")
            }
            QuerySpec::SelectEqual { extended_price } => {
                format!("select * from lineitem where l_extendedprice = {extended_price}")
            }
            QuerySpec::SelectByKey {
                order_key,
                line_number,
            } => format!(
                "select * from lineitem where l_orderkey = {order_key} and l_linenumber = {line_number}"
            ),
            QuerySpec::SelectRange {
                ship_date_low,
                ship_date_high,
                discount_low,
                discount_high,
                quantity,
            } => format!(
                "select * from lineitem where l_shipdate >= {ship_date_low} and l_shipdate < {ship_date_high} and l_discount > {discount_low} and l_discount < {discount_high} and l_quantity < {quantity}"
            ),
            QuerySpec::SelectRegex { pattern } => {
                format!("select * from lineitem where l_comment ilike '%{pattern}%'")
            }
            QuerySpec::SelectAll => "select * from lineitem".to_string(),
            QuerySpec::Structured { query_schema, .. } => {
                let cols = query_schema
                    .lines()
                    .filter_map(|l| l.split_whitespace().last())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("select {cols} from lineitem")
            }
        }
    }

    /// Whether a full-layout row satisfies this query's predicate.
    ///
    /// `comment_re` must be the compiled pattern for `SelectRegex` and is
    /// ignored otherwise; callers compile it once per payload.
    pub fn matches_row(&self, row: &RowView<'_>, comment_re: Option<&Regex>) -> bool {
        match self {
            QuerySpec::CountGreater { extended_price }
            | QuerySpec::SelectGreater { extended_price } => {
                row.extended_price() > *extended_price
            }
            QuerySpec::SelectEqual { extended_price } => row.extended_price() == *extended_price,
            QuerySpec::SelectByKey {
                order_key,
                line_number,
            } => row.order_key() == *order_key && row.line_number() == *line_number,
            QuerySpec::SelectRange {
                ship_date_low,
                ship_date_high,
                discount_low,
                discount_high,
                quantity,
            } => {
                // Bounds are asymmetric on purpose: ship date is
                // inclusive-low/exclusive-high, discount strict on both
                // sides, quantity strict.
                let ship_date = row.ship_date();
                ship_date >= *ship_date_low
                    && ship_date < *ship_date_high
                    && row.discount() > *discount_low
                    && row.discount() < *discount_high
                    && row.quantity() < *quantity
            }
            QuerySpec::SelectRegex { .. } => match comment_re {
                Some(re) => re.is_match(&row.comment_lossy()),
                None => false,
            },
            QuerySpec::SelectAll | QuerySpec::Structured { .. } => true,
        }
    }
}
