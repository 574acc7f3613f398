//! Error types for query validation and JSON<->SQL conversion.

use thiserror::Error;

/// Errors raised while validating and rewriting a tenant-submitted query.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The SQL failed to parse, or an unexpected error occurred mid-pipeline.
    #[error("Query validation failed: {0}")]
    ParseFailed(String),

    /// The statement's root is not a `SELECT`, or it contains a write/DDL node.
    #[error("Only SELECT statements are allowed")]
    NotSelect,

    /// A referenced table is neither a CTE alias nor in the registry.
    #[error("Table '{0}' is not allowed")]
    TableNotAllowed(String),

    /// A referenced column is not in its table's allowed set (this is also the
    /// error raised for any access to `project_id`, qualified or not).
    #[error("Column '{0}' does not exist")]
    ColumnNotAllowed(String),

    /// Anything else unexpected.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors raised while converting between a [`gateway_core::QueryIntent`] and SQL.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// The intent had none of metrics/dimensions/time_range set.
    #[error("Query must have at least one of: metrics, dimensions, or time_range")]
    EmptyIntent,

    /// A metric with `fn = "raw"` had no `raw_sql`.
    #[error("raw_sql is required")]
    RawSqlRequired,

    /// A time range was missing its interval fields.
    #[error("timeRange must specify 'interval_value' and 'interval_unit'")]
    MissingInterval,

    /// A filter had neither a string nor a number value.
    #[error("Filter must have either string_value or number_value. Available keys: {0}")]
    MissingFilterValue(String),

    /// A filter used an operator the builder doesn't know how to compile.
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// The SQL text could not be parsed by the analyzer.
    #[error("Only SELECT queries supported")]
    NotSelect,

    /// Any other failure compiling an intent to SQL.
    #[error("Failed to convert to SQL: {0}")]
    ConversionFailed(String),

    /// Any other failure reconstructing an intent from SQL.
    #[error("Failed to parse SQL: {0}")]
    ParseFailed(String),

    /// Anything else unexpected.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
