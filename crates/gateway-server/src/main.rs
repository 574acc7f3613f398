mod config;
mod error;
mod service;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::FacadeError;
use crate::service::{
    GatewayService, JsonToSqlRequest, JsonToSqlResponse, SqlToJsonRequest, SqlToJsonResponse,
    ValidateQueryRequest, ValidateQueryResponse,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cfg = config::load_config();
    let state = Arc::new(GatewayService::new(cfg.use_legacy_validator));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/validate", post(validate_query))
        .route("/json-to-sql", post(json_to_sql))
        .route("/sql-to-json", post(sql_to_json))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!("gateway-server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "service": "gateway-server" }))
}

async fn validate_query(
    State(state): State<Arc<GatewayService>>,
    Json(request): Json<ValidateQueryRequest>,
) -> Result<Json<ValidateQueryResponse>, FacadeError> {
    state.validate_query(request).map(Json)
}

async fn json_to_sql(
    State(state): State<Arc<GatewayService>>,
    Json(request): Json<JsonToSqlRequest>,
) -> Result<Json<JsonToSqlResponse>, FacadeError> {
    state.json_to_sql(request).map(Json)
}

async fn sql_to_json(
    State(state): State<Arc<GatewayService>>,
    Json(request): Json<SqlToJsonRequest>,
) -> Result<Json<SqlToJsonResponse>, FacadeError> {
    state.sql_to_json(request).map(Json)
}
