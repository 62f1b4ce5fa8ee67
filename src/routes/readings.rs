//! `GET /api/readings`: time-range query over stored readings.
//!
//! Without `limit`, every match is returned newest-first (storage order).
//! With `limit`, the N newest matches are selected and returned oldest-first,
//! so a capped query reads as a chronological window ending at the latest
//! reading.

use axum::{
    extract::Query,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, error, info};

use crate::validate::parse_timestamp;

use super::ApiState;

// ---

pub fn router() -> Router<ApiState> {
    // ---
    Router::new().route("/api/readings", get(handler))
}

async fn handler(
    Query(params): Query<ReadingsQuery>,
    State(state): State<ApiState>,
) -> Result<Json<ReadingsResponse>, ApiError> {
    // ---
    debug!("GET /api/readings {:?}", params);

    let filter = params.into_filter(state.max_limit)?;
    let rows = fetch_readings(&state, &filter).await?;
    let data = chronological(rows, filter.limit.is_some())
        .into_iter()
        .map(ReadingView::from)
        .collect::<Vec<_>>();

    info!("GET /api/readings - returning {} readings", data.len());
    Ok(Json(ReadingsResponse {
        count: data.len(),
        filters: filter,
        data,
    }))
}

/// Raw query parameters; kept as strings so bad input gets our own 400 body.
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    start: Option<String>,
    end: Option<String>,
    limit: Option<String>,
}

/// Validated filter, echoed back in the response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingsFilter {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

impl ReadingsQuery {
    // ---
    fn into_filter(self, max_limit: i64) -> Result<ReadingsFilter, ApiError> {
        // ---
        let start = parse_bound(self.start.as_deref())?;
        let end = parse_bound(self.end.as_deref())?;

        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(ApiError::InvalidRange);
            }
        }

        let limit = match self.limit {
            None => None,
            Some(raw) => {
                let limit = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ApiError::InvalidLimit("limit must be a positive integer"))?;
                if limit <= 0 {
                    return Err(ApiError::InvalidLimit("limit must be greater than 0"));
                }
                Some(limit.min(max_limit))
            }
        };

        Ok(ReadingsFilter { start, end, limit })
    }
}

/// Empty or absent bounds mean "unbounded".
fn parse_bound(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    // ---
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value)
            .map(Some)
            .map_err(|_| ApiError::InvalidDate),
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ReadingRow {
    id: i64,
    device_id: String,
    timestamp: DateTime<Utc>,
    temperature: f64,
    air_humidity: f64,
    soil_moisture: f64,
    status: String,
    source_topic: String,
    ingested_at: DateTime<Utc>,
}

async fn fetch_readings(state: &ApiState, filter: &ReadingsFilter) -> Result<Vec<ReadingRow>, ApiError> {
    // ---
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        r#"
        SELECT id, device_id, "timestamp",
               temperature, air_humidity, soil_moisture,
               status, source_topic, ingested_at
          FROM {}
         WHERE TRUE"#,
        state.table
    ));

    if let Some(start) = filter.start {
        query.push(r#" AND "timestamp" >= "#).push_bind(start);
    }
    if let Some(end) = filter.end {
        query.push(r#" AND "timestamp" <= "#).push_bind(end);
    }
    query.push(r#" ORDER BY "timestamp" DESC"#);
    if let Some(limit) = filter.limit {
        query.push(" LIMIT ").push_bind(limit);
    }

    // Any failure to get a connection means storage is unreachable, whatever the cause
    let mut conn = state.pool.acquire().await.map_err(ApiError::Unavailable)?;

    match query.build_query_as::<ReadingRow>().fetch_all(&mut *conn).await {
        Ok(rows) => Ok(rows),
        Err(err) if is_undefined_table(&err) => {
            debug!(table = %state.table, "readings table not created yet");
            Ok(Vec::new())
        }
        Err(err) => Err(err.into()),
    }
}

/// Rows arrive newest-first; a capped result is flipped to oldest-first.
fn chronological<T>(mut newest_first: Vec<T>, limited: bool) -> Vec<T> {
    // ---
    if limited {
        newest_first.reverse();
    }
    newest_first
}

#[derive(Debug, Serialize)]
struct ReadingsResponse {
    count: usize,
    filters: ReadingsFilter,
    data: Vec<ReadingView>,
}

#[derive(Debug, Serialize)]
struct ReadingView {
    id: i64,
    device_id: String,
    timestamp: DateTime<Utc>,
    temperature: f64,
    air_humidity: f64,
    soil_moisture: f64,
    status: String,
    source: SourceView,
}

#[derive(Debug, Serialize)]
struct SourceView {
    topic: String,
    ingested_at: DateTime<Utc>,
}

impl From<ReadingRow> for ReadingView {
    fn from(row: ReadingRow) -> Self {
        // ---
        ReadingView {
            id: row.id,
            device_id: row.device_id,
            timestamp: row.timestamp,
            temperature: row.temperature,
            air_humidity: row.air_humidity,
            soil_moisture: row.soil_moisture,
            status: row.status,
            source: SourceView {
                topic: row.source_topic,
                ingested_at: row.ingested_at,
            },
        }
    }
}

/// Client-facing errors. Bodies never carry internal details.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid date parameter")]
    InvalidDate,

    #[error("Invalid range")]
    InvalidRange,

    #[error("Invalid parameter: {0}")]
    InvalidLimit(&'static str),

    #[error("Storage unavailable: {0}")]
    Unavailable(sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, error, detail) = match &self {
            ApiError::InvalidDate => (
                StatusCode::BAD_REQUEST,
                "Invalid date parameter",
                "Use ISO 8601, for example: 2026-02-28T12:00:00Z",
            ),
            ApiError::InvalidRange => (
                StatusCode::BAD_REQUEST,
                "Invalid range",
                "start must not be later than end",
            ),
            ApiError::InvalidLimit(detail) => (StatusCode::BAD_REQUEST, "Invalid parameter", *detail),
            ApiError::Unavailable(err) => unavailable(err),
            ApiError::Storage(err) if is_unavailable(err) => unavailable(err),
            ApiError::Storage(err) => {
                error!(error = %err, "readings query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error",
                    "The readings query failed",
                )
            }
        };

        (status, Json(ErrorBody { error, detail })).into_response()
    }
}

fn unavailable(err: &sqlx::Error) -> (StatusCode, &'static str, &'static str) {
    // ---
    error!(error = %err, "readings store unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "Storage unavailable",
        "Could not reach the readings store, try again later",
    )
}

/// Connection-level failures that surface while a query is running.
fn is_unavailable(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

/// SQLSTATE 42P01: the consumer has not created the table yet.
fn is_undefined_table(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error().and_then(|db| db.code()), Some(code) if code == "42P01")
}
