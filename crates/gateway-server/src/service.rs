//! The three façade operations, as plain functions over JSON request/response
//! types. `main.rs` wires these to HTTP; the logic itself is transport-free.

use gateway_core::{QueryIntent, TableRegistry};
use gateway_sql::{builder, analyzer, LegacyValidator, ValidateAndSecureQuery, Validator};
use serde::{Deserialize, Serialize};

use crate::error::FacadeError;

#[derive(Debug, Deserialize)]
pub struct ValidateQueryRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub project_id: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateQueryResponse {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct JsonToSqlRequest {
    pub query_structure: QueryIntent,
}

#[derive(Debug, Serialize)]
pub struct JsonToSqlResponse {
    pub sql: String,
}

#[derive(Debug, Deserialize)]
pub struct SqlToJsonRequest {
    #[serde(default)]
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct SqlToJsonResponse {
    pub query_structure: QueryIntent,
}

/// Holds the process-wide, read-only table registry and the validator
/// implementation selected at startup.
pub struct GatewayService {
    registry: TableRegistry,
    use_legacy_validator: bool,
}

impl GatewayService {
    pub fn new(use_legacy_validator: bool) -> Self {
        Self {
            registry: TableRegistry::with_defaults(),
            use_legacy_validator,
        }
    }

    pub fn validate_query(
        &self,
        request: ValidateQueryRequest,
    ) -> Result<ValidateQueryResponse, FacadeError> {
        tracing::info!(op = "validate_query", "handling request");

        if request.query.is_empty() {
            return Err(FacadeError::InvalidArgument("Query is required".to_string()));
        }
        if request.project_id.is_empty() {
            return Err(FacadeError::InvalidArgument(
                "Project ID is required".to_string(),
            ));
        }

        let result = if self.use_legacy_validator {
            LegacyValidator.validate_and_secure_query(&self.registry, &request.query, &request.project_id)
        } else {
            Validator.validate_and_secure_query(&self.registry, &request.query, &request.project_id)
        };

        match result {
            Ok(query) => Ok(ValidateQueryResponse { query }),
            Err(err) => {
                tracing::warn!(op = "validate_query", error = %err, "query rejected");
                Err(FacadeError::from(err))
            }
        }
    }

    pub fn json_to_sql(&self, request: JsonToSqlRequest) -> Result<JsonToSqlResponse, FacadeError> {
        tracing::info!(op = "json_to_sql", "handling request");

        if request.query_structure.table.is_empty() {
            return Err(FacadeError::InvalidArgument(
                "Query structure with table is required".to_string(),
            ));
        }

        match builder::convert(&request.query_structure) {
            Ok(sql) => Ok(JsonToSqlResponse { sql }),
            Err(err) => {
                tracing::warn!(op = "json_to_sql", error = %err, "conversion failed");
                Err(FacadeError::from(err))
            }
        }
    }

    pub fn sql_to_json(&self, request: SqlToJsonRequest) -> Result<SqlToJsonResponse, FacadeError> {
        tracing::info!(op = "sql_to_json", "handling request");

        if request.sql.is_empty() {
            return Err(FacadeError::InvalidArgument(
                "SQL query is required".to_string(),
            ));
        }

        match analyzer::convert(&request.sql) {
            Ok(query_structure) => Ok(SqlToJsonResponse { query_structure }),
            Err(err) => {
                tracing::warn!(op = "sql_to_json", error = %err, "conversion failed");
                Err(FacadeError::from(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_query_rejects_missing_query() {
        let service = GatewayService::new(false);
        let err = service
            .validate_query(ValidateQueryRequest {
                query: String::new(),
                project_id: "p1".into(),
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Query is required");
    }

    #[test]
    fn validate_query_rejects_missing_project_id() {
        let service = GatewayService::new(false);
        let err = service
            .validate_query(ValidateQueryRequest {
                query: "SELECT 1".into(),
                project_id: String::new(),
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Project ID is required");
    }

    #[test]
    fn validate_query_rewrites_a_well_formed_query() {
        let service = GatewayService::new(false);
        let response = service
            .validate_query(ValidateQueryRequest {
                query: "SELECT span_id FROM spans".into(),
                project_id: "p1".into(),
            })
            .unwrap();
        assert!(response.query.contains("spans_v0(project_id = 'p1')"));
    }

    #[test]
    fn json_to_sql_rejects_missing_table() {
        let service = GatewayService::new(false);
        let err = service
            .json_to_sql(JsonToSqlRequest {
                query_structure: QueryIntent::default(),
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Query structure with table is required");
    }

    #[test]
    fn sql_to_json_rejects_missing_sql() {
        let service = GatewayService::new(false);
        let err = service
            .sql_to_json(SqlToJsonRequest { sql: String::new() })
            .unwrap_err();
        assert_eq!(err.to_string(), "SQL query is required");
    }

    #[test]
    fn sql_to_json_round_trips_through_json_to_sql() {
        let service = GatewayService::new(false);
        let parsed = service
            .sql_to_json(SqlToJsonRequest {
                sql: "SELECT name, COUNT(span_id) AS value FROM spans GROUP BY name".into(),
            })
            .unwrap();
        let rebuilt = service
            .json_to_sql(JsonToSqlRequest {
                query_structure: parsed.query_structure,
            })
            .unwrap();
        assert!(rebuilt.sql.contains("COUNT(span_id) AS value"));
    }
}
