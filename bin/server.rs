// Bank Marketing - HTTP API
// JSON endpoints over the star schema, exploration numbers and read-only SQL

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bank_marketing::{
    analysis, check_integrity, get_marketing_rows, get_marketing_rows_by_age_group, query,
    render_ddl, setup_database, table_counts, AppConfig, MarketingError,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    max_query_rows: usize,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Failure rendered as `ApiResponse { success: false }`
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl From<MarketingError> for ApiError {
    fn from(err: MarketingError) -> Self {
        let status = if err.is_user_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<MarketingError>() {
            Ok(marketing) => marketing.into(),
            Err(other) => Self::internal(format!("{:#}", other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        } else {
            warn!(status = %self.status, "{}", self.message);
        }
        let body = ApiResponse {
            success: false,
            data: None::<()>,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct Pagination {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
struct QueryRequest {
    sql: String,
    max_rows: Option<usize>,
}

impl QueryRequest {
    fn max_rows(&self, cap: usize) -> usize {
        self.max_rows.map(|n| n.min(cap)).unwrap_or(cap)
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/tables - Row count per table
async fn get_tables(State(state): State<AppState>) -> ApiResult<std::collections::HashMap<String, i64>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(table_counts(&conn)?)))
}

/// GET /api/records?limit&offset - Page of joined fact rows
async fn get_records(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> ApiResult<Vec<bank_marketing::MarketingRow>> {
    let limit = page
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(state.max_query_rows);
    let conn = state.conn()?;
    let rows = get_marketing_rows(&conn, limit, page.offset.unwrap_or(0))?;
    Ok(Json(ApiResponse::ok(rows)))
}

/// GET /api/age-groups - Contacts per age group
async fn get_age_groups(State(state): State<AppState>) -> ApiResult<Vec<analysis::CategoryCount>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(analysis::age_group_distribution(&conn)?)))
}

/// GET /api/age-groups/:group/records - Fact rows of one age group
async fn get_age_group_records(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> ApiResult<Vec<bank_marketing::MarketingRow>> {
    // "60+" may arrive percent-encoded
    let decoded = urlencoding::decode(&group)
        .unwrap_or_else(|_| group.clone().into())
        .into_owned();

    let conn = state.conn()?;
    let rows = get_marketing_rows_by_age_group(&conn, &decoded)?;
    Ok(Json(ApiResponse::ok(rows)))
}

/// GET /api/subscriptions - Contacts per outcome
async fn get_subscriptions(State(state): State<AppState>) -> ApiResult<Vec<analysis::CategoryCount>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(analysis::subscription_distribution(&conn)?)))
}

/// GET /api/jobs - Outcome per job
async fn get_jobs(State(state): State<AppState>) -> ApiResult<Vec<analysis::JobSubscription>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(analysis::subscription_by_job(&conn)?)))
}

/// GET /api/durations - Contact duration vs outcome
async fn get_durations(State(state): State<AppState>) -> ApiResult<Vec<analysis::DurationOutcome>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(analysis::duration_vs_outcome(&conn)?)))
}

/// GET /api/summary - Descriptive statistics of numeric columns
async fn get_summary(State(state): State<AppState>) -> ApiResult<Vec<analysis::ColumnSummary>> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(analysis::summary_statistics(&conn)?)))
}

/// GET /api/integrity - Referential integrity report
async fn get_integrity(State(state): State<AppState>) -> ApiResult<bank_marketing::IntegrityReport> {
    let conn = state.conn()?;
    Ok(Json(ApiResponse::ok(check_integrity(&conn)?)))
}

/// GET /api/ddl - Schema as SQL
async fn get_ddl() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/sql; charset=utf-8")], render_ddl())
}

/// POST /api/query - Read-only SQL, JSON result
async fn post_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<query::QueryResult> {
    let conn = state.conn()?;
    let result = query::run_query(&conn, &request.sql, request.max_rows(state.max_query_rows))?;
    info!(rows = result.row_count(), truncated = result.truncated, "query served");
    Ok(Json(ApiResponse::ok(result)))
}

/// POST /api/query/csv - Read-only SQL, CSV download
async fn post_query_csv(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    let conn = state.conn()?;
    let result = query::run_query(&conn, &request.sql, request.max_rows(state.max_query_rows))?;
    let body = result.to_csv()?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"query_result.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

/// GET / - Endpoint index
async fn serve_index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Bank Marketing API</title></head>
<body>
<h1>Bank Marketing API</h1>
<ul>
  <li><a href="/api/health">/api/health</a></li>
  <li><a href="/api/tables">/api/tables</a></li>
  <li><a href="/api/records?limit=20">/api/records?limit&amp;offset</a></li>
  <li><a href="/api/age-groups">/api/age-groups</a></li>
  <li><a href="/api/age-groups/30-44/records">/api/age-groups/:group/records</a></li>
  <li><a href="/api/subscriptions">/api/subscriptions</a></li>
  <li><a href="/api/jobs">/api/jobs</a></li>
  <li><a href="/api/durations">/api/durations</a></li>
  <li><a href="/api/summary">/api/summary</a></li>
  <li><a href="/api/integrity">/api/integrity</a></li>
  <li><a href="/api/ddl">/api/ddl</a></li>
  <li>POST /api/query, /api/query/csv with {"sql": "SELECT * FROM data LIMIT 10"}</li>
</ul>
</body>
</html>
"#;

// ============================================================================
// Main Server
// ============================================================================

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/tables", get(get_tables))
        .route("/records", get(get_records))
        .route("/age-groups", get(get_age_groups))
        .route("/age-groups/:group/records", get(get_age_group_records))
        .route("/subscriptions", get(get_subscriptions))
        .route("/jobs", get(get_jobs))
        .route("/durations", get(get_durations))
        .route("/summary", get(get_summary))
        .route("/integrity", get(get_integrity))
        .route("/ddl", get(get_ddl))
        .route("/query", post(post_query))
        .route("/query/csv", post(post_query_csv))
        .with_state(state);

    Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🌐 Bank Marketing - HTTP API");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = AppConfig::load().context("Failed to load configuration")?;
    let db_path = config.db_path();

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: bank-marketing import <csv> && bank-marketing build");
        std::process::exit(1);
    }

    let conn = Connection::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    setup_database(&conn)?;
    println!("✓ Database opened: {:?}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        max_query_rows: config.max_query_rows(),
    };

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/records", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bank_marketing::{insert_base_records, populate_star, BankRecord};

    fn record(line: usize, age: i64, subscribed: bool) -> BankRecord {
        BankRecord {
            age,
            job: "admin.".to_string(),
            marital: "single".to_string(),
            education: "tertiary".to_string(),
            credit_default: "no".to_string(),
            balance: Some(500),
            housing: "no".to_string(),
            loan: "no".to_string(),
            contact: "cellular".to_string(),
            day: 3,
            month: "jun".to_string(),
            duration: 240,
            campaign: 1,
            pdays: -1,
            previous: 0,
            poutcome: "unknown".to_string(),
            subscribed,
            source_file: "api.csv".to_string(),
            line_number: line,
        }
    }

    fn state() -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_base_records(&conn, &[record(2, 33, true), record(3, 61, false)]).unwrap();
        populate_star(&conn).unwrap();
        AppState {
            db: Arc::new(Mutex::new(conn)),
            max_query_rows: 10,
        }
    }

    #[tokio::test]
    async fn test_age_group_records() {
        let Json(response) = get_age_group_records(State(state()), Path("60%2B".to_string()))
            .await
            .ok()
            .unwrap();

        assert!(response.success);
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].age, 61);
    }

    #[tokio::test]
    async fn test_unknown_age_group_is_bad_request() {
        let err = get_age_group_records(State(state()), Path("teens".to_string()))
            .await
            .err()
            .unwrap();

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_rejects_writes() {
        let request = QueryRequest {
            sql: "DELETE FROM marketing".to_string(),
            max_rows: None,
        };
        let err = post_query(State(state()), Json(request)).await.err().unwrap();

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_syntax_error_is_bad_request() {
        for sql in ["SELEC * FROM data", "SELECT * FROM data WHER age > 30"] {
            let request = QueryRequest {
                sql: sql.to_string(),
                max_rows: None,
            };
            let err = post_query(State(state()), Json(request)).await.err().unwrap();

            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{}", sql);
        }
    }

    #[tokio::test]
    async fn test_query_caps_rows() {
        let request = QueryRequest {
            sql: "SELECT * FROM data".to_string(),
            max_rows: Some(1),
        };
        let Json(response) = post_query(State(state()), Json(request)).await.ok().unwrap();

        assert_eq!(response.data.row_count(), 1);
        assert!(response.data.truncated);
        assert_eq!(QueryRequest { sql: String::new(), max_rows: Some(500) }.max_rows(10), 10);
    }
}
