//! Compiles a [`QueryIntent`] into ClickHouse SQL text.
//!
//! This is pure string templating, not AST construction: the emitted SQL's
//! exact formatting (four-space indents, one select item per line, `WITH
//! FILL` on its own indented block) is part of the contract, and templating
//! is the most direct way to hit it byte-for-byte.

use gateway_core::{Filter, FilterOp, Metric, OrderBy, OrderDirection, QueryIntent, TimeRange};

use crate::error::BuilderError;

pub fn convert(intent: &QueryIntent) -> Result<String, BuilderError> {
    if !intent.is_well_formed() {
        return Err(BuilderError::EmptyIntent);
    }

    let mut parts = vec![
        "SELECT".to_string(),
        build_select_clause(intent)?,
        format!("FROM {}", intent.table),
    ];

    if let Some(where_clause) = build_where_clause(intent)? {
        parts.push(where_clause);
    }
    if let Some(group_clause) = build_group_by_clause(intent) {
        parts.push(group_clause);
    }
    if let Some(order_clause) = build_order_by_clause(intent)? {
        parts.push(order_clause);
    }
    if let Some(limit) = intent.limit {
        parts.push(format!("LIMIT {limit}"));
    }

    Ok(parts.join("\n"))
}

fn build_select_clause(intent: &QueryIntent) -> Result<String, BuilderError> {
    let mut items = Vec::new();

    if let Some(time_range) = &intent.time_range {
        items.push(time_bucket_sql(time_range)?);
    }

    for dimension in &intent.dimensions {
        if dimension != "time" || intent.time_range.is_none() {
            items.push(dimension.clone());
        }
    }

    for metric in &intent.metrics {
        items.push(metric_sql(metric)?);
    }

    Ok(format!("    {}", items.join(",\n    ")))
}

fn build_where_clause(intent: &QueryIntent) -> Result<Option<String>, BuilderError> {
    let mut conditions: Vec<String> = Vec::new();

    for filter in &intent.filters {
        conditions.push(filter_sql(filter)?);
    }

    if let Some(time_range) = &intent.time_range {
        conditions.extend(time_range_conditions(time_range, &intent.filters));
    }

    if conditions.is_empty() {
        Ok(None)
    } else {
        Ok(Some(format!("WHERE\n    {}", conditions.join("\n    AND "))))
    }
}

fn time_range_conditions(time_range: &TimeRange, filters: &[Filter]) -> Vec<String> {
    let col = &time_range.column;

    let has_gte = filters.iter().any(|f| {
        f.field == *col
            && matches!(f.op, FilterOp::Gte)
            && filter_value_matches(f, &time_range.from)
    });
    let has_lte = filters.iter().any(|f| {
        f.field == *col
            && matches!(f.op, FilterOp::Lte)
            && filter_value_matches(f, &time_range.to)
    });

    let mut conditions = Vec::new();
    if !has_gte {
        conditions.push(format!("{col} >= {}", time_range.from));
    }
    if !has_lte {
        conditions.push(format!("{col} <= {}", time_range.to));
    }
    conditions
}

fn filter_value_matches(filter: &Filter, bound: &str) -> bool {
    if let Some(s) = &filter.string_value {
        return s == bound;
    }
    if let Some(n) = filter.number_value {
        return format_number(n) == bound;
    }
    false
}

fn build_group_by_clause(intent: &QueryIntent) -> Option<String> {
    let mut cols = Vec::new();

    if intent.time_range.is_some() {
        cols.push("time".to_string());
    }

    for dimension in &intent.dimensions {
        if dimension != "time" || intent.time_range.is_none() {
            cols.push(dimension.clone());
        }
    }

    if cols.is_empty() {
        None
    } else {
        Some(format!("GROUP BY {}", cols.join(", ")))
    }
}

fn build_order_by_clause(intent: &QueryIntent) -> Result<Option<String>, BuilderError> {
    let mut clause = if !intent.order_by.is_empty() {
        let orders: Vec<String> = intent
            .order_by
            .iter()
            .map(|o| format!("{} {}", o.field, o.dir.as_sql()))
            .collect();
        format!("ORDER BY {}", orders.join(", "))
    } else if intent.time_range.is_some() {
        "ORDER BY time".to_string()
    } else {
        return Ok(None);
    };

    if let Some(time_range) = &intent.time_range {
        if time_range.fill_gaps {
            let interval_expr = interval_expr(time_range)?;
            clause.push_str(&format!(
                " WITH FILL\n    FROM toStartOfInterval({}, {interval_expr})\n    TO toStartOfInterval({}, {interval_expr})\n    STEP {interval_expr}",
                time_range.from, time_range.to,
            ));
        }
    }

    Ok(Some(clause))
}

fn time_bucket_sql(time_range: &TimeRange) -> Result<String, BuilderError> {
    let interval_expr = interval_expr(time_range)?;
    Ok(format!(
        "toStartOfInterval({}, {interval_expr}) AS time",
        time_range.column
    ))
}

fn interval_expr(time_range: &TimeRange) -> Result<String, BuilderError> {
    if time_range.interval_unit.is_empty() {
        return Err(BuilderError::MissingInterval);
    }
    Ok(format!(
        "toInterval({}, {})",
        time_range.interval_value, time_range.interval_unit
    ))
}

fn metric_sql(metric: &Metric) -> Result<String, BuilderError> {
    let alias = metric_alias(metric);

    if metric.function.eq_ignore_ascii_case("raw") {
        let raw_sql = metric.raw_sql.as_ref().ok_or(BuilderError::RawSqlRequired)?;
        return Ok(format!("{raw_sql} AS {alias}"));
    }

    if metric.function.eq_ignore_ascii_case("quantile") {
        let p = metric
            .args
            .as_ref()
            .and_then(|args| args.first())
            .ok_or_else(|| {
                BuilderError::ConversionFailed(format!(
                    "quantile metric on column '{}' requires a percentile argument",
                    metric.column
                ))
            })?;
        return Ok(format!("quantile({p})({}) AS {alias}", metric.column));
    }

    Ok(format!("{}({}) AS {alias}", metric.function, metric.column))
}

fn metric_alias(metric: &Metric) -> String {
    metric.alias.clone().unwrap_or_else(|| {
        if metric.column.is_empty() {
            "value".to_string()
        } else {
            metric.column.clone()
        }
    })
}

fn filter_sql(filter: &Filter) -> Result<String, BuilderError> {
    let value = format_filter_value(filter)?;

    if let Some(op) = filter.op.as_sql_operator() {
        return Ok(format!("{} {op} {value}", filter.field));
    }

    if matches!(filter.op, FilterOp::Includes) {
        return Ok(format!("has({}, {value})", filter.field));
    }

    Err(BuilderError::UnsupportedOperator(format!("{:?}", filter.op)))
}

fn format_filter_value(filter: &Filter) -> Result<String, BuilderError> {
    if let Some(s) = &filter.string_value {
        return Ok(format_value_string(s));
    }
    if let Some(n) = filter.number_value {
        return Ok(format_number(n));
    }
    Err(BuilderError::MissingFilterValue(format!(
        "field={}, op={:?}",
        filter.field, filter.op
    )))
}

fn format_value_string(value: &str) -> String {
    if is_placeholder(value) {
        return value.to_string();
    }
    format!("'{value}'")
}

fn is_placeholder(value: &str) -> bool {
    value.starts_with('{') && value.ends_with('}') && value.contains(':')
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_intent_is_rejected() {
        let err = convert(&QueryIntent::default()).unwrap_err();
        assert!(matches!(err, BuilderError::EmptyIntent));
    }

    #[test]
    fn dimensions_only_query() {
        let intent = QueryIntent {
            table: "spans".into(),
            dimensions: vec!["name".into(), "status".into()],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert_eq!(sql, "SELECT\n    name,\n    status\nFROM spans");
    }

    #[test]
    fn metric_with_default_alias() {
        let intent = QueryIntent {
            table: "spans".into(),
            metrics: vec![Metric {
                function: "count".into(),
                column: "span_id".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("count(span_id) AS span_id"));
    }

    #[test]
    fn quantile_metric_uses_nested_call_syntax() {
        let intent = QueryIntent {
            table: "spans".into(),
            metrics: vec![Metric {
                function: "quantile".into(),
                column: "duration".into(),
                alias: Some("p95".into()),
                args: Some(vec![serde_json::json!(0.95)]),
                ..Default::default()
            }],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("quantile(0.95)(duration) AS p95"));
    }

    #[test]
    fn quantile_metric_without_percentile_argument_is_rejected() {
        let intent = QueryIntent {
            table: "spans".into(),
            metrics: vec![Metric {
                function: "quantile".into(),
                column: "duration".into(),
                alias: Some("p95".into()),
                args: None,
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = convert(&intent).unwrap_err();
        assert!(matches!(err, BuilderError::ConversionFailed(_)));
    }

    #[test]
    fn raw_metric_without_raw_sql_is_rejected() {
        let intent = QueryIntent {
            table: "spans".into(),
            metrics: vec![Metric {
                function: "raw".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = convert(&intent).unwrap_err();
        assert!(matches!(err, BuilderError::RawSqlRequired));
    }

    #[test]
    fn raw_metric_emits_verbatim_expression() {
        let intent = QueryIntent {
            table: "spans".into(),
            metrics: vec![Metric {
                function: "raw".into(),
                raw_sql: Some("arrayJoin(tags)".into()),
                alias: Some("tag".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("arrayJoin(tags) AS tag"));
    }

    #[test]
    fn time_range_builds_bucket_where_group_and_order() {
        let intent = QueryIntent {
            table: "spans".into(),
            time_range: Some(TimeRange {
                column: "start_time".into(),
                from: "'2024-01-01'".into(),
                to: "'2024-01-02'".into(),
                interval_value: 1,
                interval_unit: "hour".into(),
                fill_gaps: false,
            }),
            metrics: vec![Metric {
                function: "count".into(),
                column: "span_id".into(),
                alias: Some("value".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("toStartOfInterval(start_time, toInterval(1, hour)) AS time"));
        assert!(sql.contains("start_time >= '2024-01-01'"));
        assert!(sql.contains("start_time <= '2024-01-02'"));
        assert!(sql.contains("GROUP BY time"));
        assert!(sql.contains("ORDER BY time"));
    }

    #[test]
    fn time_range_with_fill_gaps_appends_with_fill_block() {
        let intent = QueryIntent {
            table: "spans".into(),
            time_range: Some(TimeRange {
                column: "start_time".into(),
                from: "{start_time:DateTime64}".into(),
                to: "{end_time:DateTime64}".into(),
                interval_value: 1,
                interval_unit: "day".into(),
                fill_gaps: true,
            }),
            dimensions: vec!["time".into()],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("WITH FILL"));
        assert!(sql.contains("FROM toStartOfInterval({start_time:DateTime64}, toInterval(1, day))"));
        assert!(sql.contains("STEP toInterval(1, day)"));
        // "time" dimension is absorbed into the bucket column, not duplicated.
        assert!(!sql.contains("    time,\n"));
    }

    #[test]
    fn existing_filter_on_time_column_suppresses_synthesized_bound() {
        let intent = QueryIntent {
            table: "spans".into(),
            time_range: Some(TimeRange {
                column: "start_time".into(),
                from: "'2024-01-01'".into(),
                to: "'2024-01-02'".into(),
                interval_value: 1,
                interval_unit: "hour".into(),
                fill_gaps: false,
            }),
            filters: vec![Filter {
                field: "start_time".into(),
                op: FilterOp::Gte,
                string_value: Some("'2024-01-01'".into()),
                number_value: None,
            }],
            dimensions: vec!["name".into()],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert_eq!(sql.matches("start_time >=").count(), 1);
        assert!(sql.contains("start_time <= '2024-01-02'"));
    }

    #[test]
    fn includes_filter_compiles_to_has_call() {
        let intent = QueryIntent {
            table: "spans".into(),
            dimensions: vec!["name".into()],
            filters: vec![Filter {
                field: "tags".into(),
                op: FilterOp::Includes,
                string_value: Some("prod".into()),
                number_value: None,
            }],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("has(tags, 'prod')"));
    }

    #[test]
    fn number_filter_value_is_unquoted() {
        let intent = QueryIntent {
            table: "spans".into(),
            dimensions: vec!["name".into()],
            filters: vec![Filter {
                field: "total_tokens".into(),
                op: FilterOp::Gt,
                string_value: None,
                number_value: Some(100.0),
            }],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("total_tokens > 100"));
    }

    #[test]
    fn filter_missing_both_values_is_rejected() {
        let intent = QueryIntent {
            table: "spans".into(),
            dimensions: vec!["name".into()],
            filters: vec![Filter {
                field: "status".into(),
                op: FilterOp::Eq,
                string_value: None,
                number_value: None,
            }],
            ..Default::default()
        };
        let err = convert(&intent).unwrap_err();
        assert!(matches!(err, BuilderError::MissingFilterValue(_)));
    }

    #[test]
    fn order_by_defaults_to_ascending() {
        let intent = QueryIntent {
            table: "spans".into(),
            dimensions: vec!["name".into()],
            order_by: vec![OrderBy {
                field: "name".into(),
                dir: Default::default(),
            }],
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.contains("ORDER BY name ASC"));
    }

    #[test]
    fn scenario_count_by_name_ordered_desc_with_limit_matches_exactly() {
        let intent = QueryIntent {
            table: "spans".into(),
            metrics: vec![Metric {
                function: "COUNT".into(),
                column: "span_id".into(),
                alias: Some("value".into()),
                ..Default::default()
            }],
            dimensions: vec!["name".into()],
            filters: vec![
                Filter {
                    field: "start_time".into(),
                    op: FilterOp::Gte,
                    string_value: Some("{start_time:DateTime64}".into()),
                    number_value: None,
                },
                Filter {
                    field: "start_time".into(),
                    op: FilterOp::Lte,
                    string_value: Some("{end_time:DateTime64}".into()),
                    number_value: None,
                },
            ],
            order_by: vec![OrderBy {
                field: "value".into(),
                dir: OrderDirection::Desc,
            }],
            limit: Some(5),
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        pretty_assertions::assert_eq!(
            sql,
            "SELECT\n    \
                name,\n    \
                COUNT(span_id) AS value\n\
             FROM spans\n\
             WHERE\n    \
                start_time >= {start_time:DateTime64}\n    \
                AND start_time <= {end_time:DateTime64}\n\
             GROUP BY name\n\
             ORDER BY value DESC\n\
             LIMIT 5"
        );
    }

    #[test]
    fn limit_is_appended_last() {
        let intent = QueryIntent {
            table: "spans".into(),
            dimensions: vec!["name".into()],
            limit: Some(50),
            ..Default::default()
        };
        let sql = convert(&intent).unwrap();
        assert!(sql.ends_with("LIMIT 50"));
    }
}
