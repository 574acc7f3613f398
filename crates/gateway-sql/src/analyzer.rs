//! Reconstructs a [`QueryIntent`] from SQL text: the builder's inverse.
//!
//! A hybrid approach: `sqlparser` gives a reliable tree for the SELECT list,
//! WHERE clause, and GROUP BY; `ORDER BY`/`LIMIT`/`WITH FILL` are read back
//! from the source text directly via regex, since their exact AST shape
//! varies across `sqlparser` releases and the gateway only ever needs to
//! recognize the handful of forms the builder itself emits. Anything outside
//! that subset degrades to a `fn = "raw"` metric rather than failing.

use std::collections::{HashMap, HashSet};

use gateway_core::{Filter, FilterOp, Metric, OrderBy, OrderDirection, QueryIntent, TimeRange};
use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Query, Select, SelectItem, SetExpr, Statement, Value as AstValue,
};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;

use crate::error::BuilderError;

pub fn convert(sql: &str) -> Result<QueryIntent, BuilderError> {
    let (protected, placeholders) = protect_placeholders(sql);

    let dialect = ClickHouseDialect {};
    let mut statements = Parser::parse_sql(&dialect, &protected)
        .map_err(|e| BuilderError::ParseFailed(e.to_string()))?;

    if statements.len() != 1 {
        return Err(BuilderError::NotSelect);
    }

    let query = match statements.remove(0) {
        Statement::Query(q) => *q,
        _ => return Err(BuilderError::NotSelect),
    };

    let select = query.body.as_select().ok_or(BuilderError::NotSelect)?;

    let table = table_name(select);
    let grouped_columns = grouped_columns(select);

    let (metrics, dimensions, mut time_range) =
        classify_select_items(select, &grouped_columns, &placeholders);

    if let Some(tr) = time_range.as_mut() {
        tr.fill_gaps = order_by_has_with_fill(&protected);
        let (from, to) = traces_time_bounds(select.selection.as_ref(), &tr.column, &placeholders);
        tr.from = from;
        tr.to = to;
    }

    let time_col = time_range.as_ref().map(|tr| tr.column.clone());
    let filters = extract_filters(select.selection.as_ref(), time_col.as_deref(), &placeholders);

    let order_by = parse_order_by(&protected);
    let limit = parse_limit(&protected);

    Ok(QueryIntent {
        table,
        metrics,
        dimensions,
        time_range,
        filters,
        order_by,
        limit,
    })
}

fn table_name(select: &Select) -> String {
    select
        .from
        .first()
        .map(|twj| twj.relation.to_string())
        .unwrap_or_default()
}

fn grouped_columns(select: &Select) -> HashSet<String> {
    let mut cols = HashSet::new();
    if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
        for expr in exprs {
            cols.insert(expr_display_name(expr));
        }
    }
    cols
}

fn expr_display_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_else(|| expr.to_string()),
        other => other.to_string(),
    }
}

fn classify_select_items(
    select: &Select,
    grouped_columns: &HashSet<String>,
    placeholders: &HashMap<String, String>,
) -> (Vec<Metric>, Vec<String>, Option<TimeRange>) {
    let mut metrics = Vec::new();
    let mut dimensions = Vec::new();
    let mut time_range = None;

    for item in &select.projection {
        match item {
            SelectItem::ExprWithAlias { expr, alias } => {
                let inner_text = expr.to_string();
                if let Some(tr) = try_time_bucket(&inner_text, placeholders) {
                    time_range = Some(tr);
                } else if grouped_columns.contains(&alias.value)
                    || is_simple_column_ref(expr, grouped_columns)
                {
                    if let Expr::Identifier(_) | Expr::CompoundIdentifier(_) = expr {
                        dimensions.push(expr_display_name(expr));
                    }
                } else {
                    metrics.push(extract_metric(&inner_text, Some(alias.value.clone())));
                }
            }
            SelectItem::UnnamedExpr(expr) => {
                if let Expr::Identifier(_) | Expr::CompoundIdentifier(_) = expr {
                    dimensions.push(expr_display_name(expr));
                } else {
                    metrics.push(extract_metric(&expr.to_string(), None));
                }
            }
            _ => {}
        }
    }

    (metrics, dimensions, time_range)
}

fn is_simple_column_ref(expr: &Expr, grouped_columns: &HashSet<String>) -> bool {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            grouped_columns.contains(&expr_display_name(expr))
        }
        other => grouped_columns.contains(&other.to_string()),
    }
}

static TIME_BUCKET_RE: &str =
    r"(?is)^toStartOfInterval\(\s*([A-Za-z_][\w.]*)\s*,\s*toInterval\(\s*(.+?)\s*,\s*(.+?)\s*\)\s*\)$";
static QUANTILE_RE: &str = r"(?is)^quantile\(\s*(.+?)\s*\)\(\s*([A-Za-z_][\w.]*)\s*\)$";
static STANDARD_AGG_RE: &str = r"(?is)^(count|sum|avg|min|max)\(\s*(\*|[A-Za-z_][\w.]*)\s*\)$";

fn try_time_bucket(inner_text: &str, placeholders: &HashMap<String, String>) -> Option<TimeRange> {
    let re = Regex::new(TIME_BUCKET_RE).expect("static time bucket regex is valid");
    let caps = re.captures(inner_text)?;
    let column = caps[1].to_string();
    let interval_value = resolve_value_text(&caps[2], placeholders)
        .parse::<i64>()
        .unwrap_or(0);
    let interval_unit = resolve_value_text(&caps[3], placeholders);

    Some(TimeRange {
        column,
        from: "{start_time:DateTime64}".to_string(),
        to: "{end_time:DateTime64}".to_string(),
        interval_value,
        interval_unit,
        fill_gaps: false,
    })
}

fn extract_metric(inner_text: &str, alias: Option<String>) -> Metric {
    if let Some(caps) = Regex::new(QUANTILE_RE).unwrap().captures(inner_text) {
        let percentile = caps[1].trim().parse::<f64>().unwrap_or(0.5);
        return Metric {
            function: "quantile".to_string(),
            column: caps[2].to_string(),
            alias,
            args: Some(vec![serde_json::json!(percentile)]),
            raw_sql: None,
        };
    }

    if let Some(caps) = Regex::new(STANDARD_AGG_RE).unwrap().captures(inner_text) {
        return Metric {
            function: caps[1].to_ascii_lowercase(),
            column: caps[2].to_string(),
            alias,
            args: None,
            raw_sql: None,
        };
    }

    Metric {
        function: "raw".to_string(),
        column: String::new(),
        alias,
        args: None,
        raw_sql: Some(inner_text.to_string()),
    }
}

fn extract_filters(
    selection: Option<&Expr>,
    time_col: Option<&str>,
    placeholders: &HashMap<String, String>,
) -> Vec<Filter> {
    let Some(expr) = selection else {
        return Vec::new();
    };

    let mut filters = Vec::new();
    let mut leaves = Vec::new();
    flatten_and_or(expr, &mut leaves);

    for leaf in leaves {
        if let Expr::BinaryOp { left, op, right } = leaf {
            let Some(op_name) = comparison_op_name(op) else {
                continue;
            };
            let Some(column) = column_name(left) else {
                continue;
            };
            if Some(column.as_str()) == time_col {
                continue;
            }

            let (string_value, number_value) = filter_value(right, placeholders);
            filters.push(Filter {
                field: column,
                op: op_name,
                string_value,
                number_value,
            });
        }
    }

    filters
}

/// `traces_time_bounds` mirrors the filter walk but only looks for the time
/// column's own `>=`/`<=` bounds; used when a query has a time bucket but the
/// bounds need pulling out of an otherwise-ordinary WHERE clause.
fn traces_time_bounds(
    selection: Option<&Expr>,
    time_col: &str,
    placeholders: &HashMap<String, String>,
) -> (String, String) {
    let mut from_val = "{start_time:DateTime64}".to_string();
    let mut to_val = "{end_time:DateTime64}".to_string();

    let Some(expr) = selection else {
        return (from_val, to_val);
    };

    let mut leaves = Vec::new();
    flatten_and_or(expr, &mut leaves);

    for leaf in leaves {
        if let Expr::BinaryOp { left, op, right } = leaf {
            let Some(column) = column_name(left) else {
                continue;
            };
            if column != time_col {
                continue;
            }
            match op {
                BinaryOperator::GtEq => from_val = resolve_value_text(&right.to_string(), placeholders),
                BinaryOperator::LtEq => to_val = resolve_value_text(&right.to_string(), placeholders),
                _ => {}
            }
        }
    }

    (from_val, to_val)
}

/// Recurses into both branches of `AND` and `OR` uniformly: bounds or filters
/// reachable only through an `OR` are still surfaced, matching the source
/// behavior this was ported from (see the open-question note in DESIGN.md).
fn flatten_and_or<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryOp { left, op: BinaryOperator::And, right }
        | Expr::BinaryOp { left, op: BinaryOperator::Or, right } => {
            flatten_and_or(left, out);
            flatten_and_or(right, out);
        }
        Expr::Nested(inner) => flatten_and_or(inner, out),
        other => out.push(other),
    }
}

fn comparison_op_name(op: &BinaryOperator) -> Option<FilterOp> {
    match op {
        BinaryOperator::Eq => Some(FilterOp::Eq),
        BinaryOperator::NotEq => Some(FilterOp::Ne),
        BinaryOperator::Gt => Some(FilterOp::Gt),
        BinaryOperator::GtEq => Some(FilterOp::Gte),
        BinaryOperator::Lt => Some(FilterOp::Lt),
        BinaryOperator::LtEq => Some(FilterOp::Lte),
        _ => None,
    }
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.clone()),
        _ => None,
    }
}

/// Extracts a comparison's right-hand value, keeping the oneof invariant:
/// placeholders are always `string_value` (never type-coerced to a number),
/// numeric literals become `number_value`, everything else is `string_value`.
fn filter_value(expr: &Expr, placeholders: &HashMap<String, String>) -> (Option<String>, Option<f64>) {
    match expr {
        Expr::Value(value_with_span) => match &value_with_span.value {
            AstValue::Number(n, _) => (None, n.parse::<f64>().ok()),
            AstValue::SingleQuotedString(s) | AstValue::DoubleQuotedString(s) => {
                if let Some(original) = placeholders.get(s) {
                    (Some(original.clone()), None)
                } else {
                    (Some(s.clone()), None)
                }
            }
            other => (Some(other.to_string()), None),
        },
        Expr::UnaryOp { op: sqlparser::ast::UnaryOperator::Minus, expr: inner } => {
            if let Expr::Value(value_with_span) = inner.as_ref() {
                if let AstValue::Number(n, _) = &value_with_span.value {
                    return (None, n.parse::<f64>().ok().map(|v: f64| -v));
                }
            }
            (Some(expr.to_string()), None)
        }
        other => (Some(other.to_string()), None),
    }
}

fn resolve_value_text(raw: &str, placeholders: &HashMap<String, String>) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        let inner = &trimmed[1..trimmed.len() - 1];
        if let Some(original) = placeholders.get(inner) {
            return original.clone();
        }
        return inner.to_string();
    }
    trimmed.to_string()
}

// ---------------------------------------------------------------------
// text-level ORDER BY / LIMIT / WITH FILL recognition
// ---------------------------------------------------------------------

fn order_by_segment(sql: &str) -> Option<String> {
    let re = Regex::new(r"(?is)\bORDER BY\s+(.+?)(?:\bLIMIT\b|$)").expect("static ORDER BY regex is valid");
    re.captures(sql).map(|c| c[1].trim().to_string())
}

fn order_by_has_with_fill(sql: &str) -> bool {
    order_by_segment(sql)
        .map(|segment| segment.to_uppercase().contains("WITH FILL"))
        .unwrap_or(false)
}

fn parse_order_by(sql: &str) -> Vec<OrderBy> {
    let Some(segment) = order_by_segment(sql) else {
        return Vec::new();
    };

    let with_fill_re = Regex::new(r"(?is)\s*WITH\s+FILL.*?(?=,|$)").expect("static WITH FILL regex is valid");
    let cleaned = with_fill_re.replace_all(&segment, "");

    cleaned
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut tokens = part.split_whitespace();
            let field = tokens.next()?.to_string();
            let dir = match tokens.next().map(|t| t.to_ascii_uppercase()) {
                Some(ref t) if t == "DESC" => OrderDirection::Desc,
                _ => OrderDirection::Asc,
            };
            Some(OrderBy { field, dir })
        })
        .collect()
}

fn parse_limit(sql: &str) -> Option<i64> {
    let re = Regex::new(r"(?i)\bLIMIT\s+(\d+)").expect("static LIMIT regex is valid");
    re.captures(sql).and_then(|c| c[1].parse::<i64>().ok())
}

// ---------------------------------------------------------------------
// placeholder protection (local to this module; see validator.rs for the
// equivalent pass used on the rewrite path)
// ---------------------------------------------------------------------

fn protect_placeholders(sql: &str) -> (String, HashMap<String, String>) {
    let re = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\s*:\s*([A-Za-z0-9_]+)\}")
        .expect("static placeholder regex is valid");
    let mut map = HashMap::new();
    let mut index = 0usize;
    let replaced = re.replace_all(sql, |caps: &regex::Captures| {
        let token = format!("__gwph_{index}__");
        let name = &caps[1];
        let normalized_type = normalize_type(&caps[2]);
        map.insert(token.clone(), format!("{{{name}:{normalized_type}}}"));
        index += 1;
        format!("'{token}'")
    });
    (replaced.into_owned(), map)
}

fn normalize_type(type_str: &str) -> String {
    match type_str.to_ascii_uppercase().as_str() {
        "TEXT" => "String".to_string(),
        "DATETIME" | "DATETIME64" => "DateTime64".to_string(),
        _ => type_str.to_string(),
    }
}
