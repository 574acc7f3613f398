//! The table registry: the fixed catalog of logical tables a tenant query may
//! reference, and the columns allowed on each.
//!
//! The registry is seeded once, at process start, from [`TableRegistry::with_defaults`]
//! and never mutated afterwards. There is deliberately no API to register a table
//! at runtime; widening tenant access is a deploy-time decision, not a request-time one.

use std::collections::{HashMap, HashSet};

/// Immutable descriptor for one logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    allowed_columns: HashSet<String>,
    time_column: Option<String>,
}

impl TableSchema {
    fn new(name: &str, columns: &[&str], time_column: Option<&str>) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            allowed_columns: columns.iter().map(|c| c.to_ascii_lowercase()).collect(),
            time_column: time_column.map(|c| c.to_ascii_lowercase()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_column(&self) -> Option<&str> {
        self.time_column.as_deref()
    }

    /// Case-insensitive membership check.
    pub fn is_column_allowed(&self, column: &str) -> bool {
        self.allowed_columns.contains(&column.to_ascii_lowercase())
    }

    /// The view function a reference to this table must be rewritten to, e.g.
    /// `spans` -> `spans_v0`.
    pub fn view_function_name(&self) -> String {
        format!("{}_v0", self.name)
    }
}

/// Case-insensitive lookup table of [`TableSchema`]s.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: HashMap<String, TableSchema>,
}

impl TableRegistry {
    /// An empty registry, useful for tests that want to exercise rejection paths.
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// The registry seeded with the gateway's seven logical tables.
    pub fn with_defaults() -> Self {
        let mut tables = HashMap::new();
        for schema in default_table_schemas() {
            tables.insert(schema.name.clone(), schema);
        }
        Self { tables }
    }

    pub fn is_table_allowed(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn default_table_schemas() -> Vec<TableSchema> {
    vec![
        TableSchema::new(
            "spans",
            &[
                "span_id",
                "status",
                "name",
                "path",
                "parent_span_id",
                "span_type",
                "start_time",
                "end_time",
                "duration",
                "input",
                "output",
                "request_model",
                "response_model",
                "model",
                "provider",
                "input_tokens",
                "output_tokens",
                "total_tokens",
                "input_cost",
                "output_cost",
                "total_cost",
                "attributes",
                "trace_id",
                "tags",
            ],
            Some("start_time"),
        ),
        TableSchema::new(
            "traces",
            &[
                "id",
                "trace_type",
                "metadata",
                "start_time",
                "end_time",
                "duration",
                "input_tokens",
                "output_tokens",
                "total_tokens",
                "input_cost",
                "output_cost",
                "total_cost",
                "status",
                "user_id",
                "session_id",
                "top_span_id",
                "top_span_name",
                "top_span_type",
                "tags",
            ],
            Some("start_time"),
        ),
        TableSchema::new(
            "dataset_datapoints",
            &["id", "created_at", "dataset_id", "data", "target", "metadata"],
            Some("created_at"),
        ),
        // Same shape as dataset_datapoints; the underlying view exposes only the
        // latest version of each datapoint, but the column/time-column contract
        // a tenant query sees is identical.
        TableSchema::new(
            "dataset_datapoint_versions",
            &["id", "created_at", "dataset_id", "data", "target", "metadata"],
            Some("created_at"),
        ),
        TableSchema::new(
            "evaluation_datapoints",
            &[
                "id",
                "evaluation_id",
                "trace_id",
                "created_at",
                "data",
                "target",
                "metadata",
                "executor_output",
                "index",
                "group_id",
                "scores",
            ],
            Some("created_at"),
        ),
        TableSchema::new(
            "events",
            &[
                "id",
                "span_id",
                "name",
                "timestamp",
                "attributes",
                "trace_id",
                "user_id",
                "session_id",
            ],
            Some("timestamp"),
        ),
        TableSchema::new(
            "tags",
            &["id", "span_id", "name", "created_at", "source"],
            Some("created_at"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_seven_tables() {
        let registry = TableRegistry::with_defaults();
        for name in [
            "spans",
            "traces",
            "dataset_datapoints",
            "dataset_datapoint_versions",
            "evaluation_datapoints",
            "events",
            "tags",
        ] {
            assert!(registry.is_table_allowed(name), "missing table {name}");
        }
    }

    #[test]
    fn table_lookup_and_names_are_case_insensitive() {
        let registry = TableRegistry::with_defaults();
        assert!(registry.is_table_allowed("SPANS"));
        assert!(registry.is_table_allowed("Spans"));
        let schema = registry.get("SPANS").unwrap();
        assert!(schema.is_column_allowed("SPAN_ID"));
        assert!(schema.is_column_allowed("span_id"));
    }

    #[test]
    fn unknown_table_and_view_function_names_are_rejected() {
        let registry = TableRegistry::with_defaults();
        assert!(!registry.is_table_allowed("users"));
        // A view function name is not itself a logical table.
        assert!(!registry.is_table_allowed("spans_v0"));
    }

    #[test]
    fn project_id_is_never_an_allowed_column() {
        let registry = TableRegistry::with_defaults();
        for name in registry.table_names().map(str::to_string).collect::<Vec<_>>() {
            let schema = registry.get(&name).unwrap();
            assert!(
                !schema.is_column_allowed("project_id"),
                "{name} must never allow project_id"
            );
        }
    }

    #[test]
    fn view_function_name_appends_v0_suffix() {
        let registry = TableRegistry::with_defaults();
        assert_eq!(registry.get("spans").unwrap().view_function_name(), "spans_v0");
        assert_eq!(registry.get("traces").unwrap().view_function_name(), "traces_v0");
    }

    #[test]
    fn traces_and_spans_share_start_time_but_only_traces_is_time_windowed() {
        // Both schemas carry time_column = start_time; the rewrite trigger that
        // injects start_time/end_time view args is name-based (only "traces"),
        // not time_column-based -- see the validator for where this matters.
        let registry = TableRegistry::with_defaults();
        assert_eq!(registry.get("spans").unwrap().time_column(), Some("start_time"));
        assert_eq!(registry.get("traces").unwrap().time_column(), Some("start_time"));
    }
}
