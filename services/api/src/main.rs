//! Ward data API
//!
//! Read-only JSON over the loaded ward schema.
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /tables - List browsable datasets
//! - GET /tables/:name - Rows of one dataset
//! - GET /wards/:ward_number - Ward details
//! - GET /turnout - Turnout per ward
//! - GET /winners - Winner per race
//! - GET /curated - List curated correlation queries
//! - GET /curated/:id - Run one curated query

mod queries;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::queries::NamedQuery;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct QueryInfo {
    id: &'static str,
    title: &'static str,
    description: &'static str,
}

impl From<&NamedQuery> for QueryInfo {
    fn from(q: &NamedQuery) -> Self {
        Self {
            id: q.id,
            title: q.title,
            description: q.description,
        }
    }
}

#[derive(Serialize)]
struct QueryResult {
    id: &'static str,
    title: &'static str,
    description: &'static str,
    sql: String,
    rows: Value,
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
}

/// A failed request. Query failures carry the SQL that failed.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn not_found(what: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorResponse {
                error: what,
                query: None,
            },
        }
    }

    fn query(e: sqlx::Error, sql: &str) -> Self {
        error!(error = %e, "query failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorResponse {
                error: e.to_string(),
                query: Some(sql.to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ============================================================================
// Query execution
// ============================================================================

/// Run `q` and return its rows as a JSON array.
async fn fetch_rows(pool: &PgPool, q: &NamedQuery) -> Result<Value, ApiError> {
    sqlx::query_scalar::<_, Value>(&q.as_json_array())
        .fetch_one(pool)
        .await
        .map_err(|e| ApiError::query(e, &q.sql))
}

async fn run_named(pool: &PgPool, q: NamedQuery) -> Result<Json<QueryResult>, ApiError> {
    let rows = fetch_rows(pool, &q).await?;
    Ok(Json(QueryResult {
        id: q.id,
        title: q.title,
        description: q.description,
        sql: q.sql,
        rows,
    }))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn tables_handler() -> Json<Vec<QueryInfo>> {
    Json(queries::datasets().iter().map(QueryInfo::from).collect())
}

async fn table_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<QueryResult>, ApiError> {
    let q = queries::dataset(&name)
        .ok_or_else(|| ApiError::not_found(format!("Unknown dataset: {}", name)))?;
    run_named(&state.pool, q).await
}

async fn ward_handler(
    State(state): State<Arc<AppState>>,
    Path(ward_number): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    let sql = format!("SELECT row_to_json(q) FROM ({}) q", queries::WARD_DETAIL);
    let row = sqlx::query_scalar::<_, Value>(&sql)
        .bind(ward_number)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| ApiError::query(e, queries::WARD_DETAIL))?;
    row.map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Ward {} not found", ward_number)))
}

async fn turnout_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueryResult>, ApiError> {
    run_named(&state.pool, queries::turnout()).await
}

async fn winners_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueryResult>, ApiError> {
    run_named(&state.pool, queries::winners()).await
}

async fn curated_list_handler() -> Json<Vec<QueryInfo>> {
    Json(queries::curated().iter().map(QueryInfo::from).collect())
}

async fn curated_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QueryResult>, ApiError> {
    let q = queries::curated_by_id(&id)
        .ok_or_else(|| ApiError::not_found(format!("Unknown curated query: {}", id)))?;
    run_named(&state.pool, q).await
}

fn router(state: Arc<AppState>) -> Router {
    // CORS for the dashboard
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/tables", get(tables_handler))
        .route("/tables/:name", get(table_handler))
        .route("/wards/:ward_number", get(ward_handler))
        .route("/turnout", get(turnout_handler))
        .route("/winners", get(winners_handler))
        .route("/curated", get(curated_list_handler))
        .route("/curated/:id", get(curated_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;
    info!("database connected");

    let app = router(Arc::new(AppState { pool }));

    info!(%bind, "API listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status() {
        let resp = ApiError::not_found("Unknown dataset: x".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_query_error_carries_sql() {
        let err = ApiError::query(sqlx::Error::RowNotFound, "SELECT 1");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_value(&err.body).unwrap();
        assert_eq!(body["query"], "SELECT 1");
        assert!(body["error"].as_str().is_some());
    }

    #[test]
    fn test_not_found_body_omits_query() {
        let err = ApiError::not_found("Ward 99 not found".to_string());
        let body = serde_json::to_value(&err.body).unwrap();
        assert!(body.get("query").is_none());
    }

    #[test]
    fn test_query_info_from_named() {
        let all = queries::curated();
        let info = QueryInfo::from(&all[0]);
        assert_eq!(info.id, "population_turnout");
    }
}
