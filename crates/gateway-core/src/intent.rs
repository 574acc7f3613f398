//! The structured query-intent model exchanged between the UI-driven query
//! builder and the gateway: the JSON shape the builder compiles to SQL, and
//! the shape the analyzer reconstructs from SQL.

use serde::{Deserialize, Serialize};

/// A normalized, structured description of an analytical query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryIntent {
    pub table: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl QueryIntent {
    /// An intent is well-formed only once it asks for something: at least one
    /// of metrics, dimensions, or a time range.
    pub fn is_well_formed(&self) -> bool {
        !self.metrics.is_empty() || !self.dimensions.is_empty() || self.time_range.is_some()
    }
}

/// One aggregated (or raw) output column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    /// Aggregate function name, e.g. `"count"`, `"quantile"`, or the sentinel
    /// `"raw"` meaning `raw_sql` should be emitted verbatim.
    #[serde(rename = "fn")]
    pub function: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_sql: Option<String>,
}

/// A time bucketed window: which column to bucket, the window bounds, the
/// bucket width, and whether gaps between buckets should be filled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeRange {
    pub column: String,
    pub from: String,
    pub to: String,
    pub interval_value: i64,
    pub interval_unit: String,
    #[serde(default)]
    pub fill_gaps: bool,
}

/// One predicate over a column. Exactly one of `string_value`/`number_value`
/// must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_value: Option<f64>,
}

impl Filter {
    pub fn has_exactly_one_value(&self) -> bool {
        self.string_value.is_some() != self.number_value.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Includes,
}

impl FilterOp {
    /// The SQL comparison operator for the binary-comparison ops. `Includes`
    /// is not a binary operator (it compiles to `has(field, value)`).
    pub fn as_sql_operator(&self) -> Option<&'static str> {
        match self {
            FilterOp::Eq => Some("="),
            FilterOp::Ne => Some("!="),
            FilterOp::Gt => Some(">"),
            FilterOp::Gte => Some(">="),
            FilterOp::Lt => Some("<"),
            FilterOp::Lte => Some("<="),
            FilterOp::Includes => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub dir: OrderDirection,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}
