use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use logcount_analysis::{AggregationDimension, GroupKey};
use logcount_counts::{CountFilter, CountRecord, CountStore};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::ApiState;

const DEFAULT_TOP_LIMIT: usize = 10;

/// Failure of a single request, rendered as a JSON body.
#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn store_error(e: &impl std::error::Error) -> ApiError {
    error!(error = %e, "count store query failed");
    ApiError::Internal(format!("count store query failed: {e}"))
}

fn parse_dimension(raw: &str) -> Result<AggregationDimension, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

fn parse_time(name: &str, raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::BadRequest(format!("invalid {name} timestamp {raw:?}: {e}")))
}

fn required(name: &str, value: Option<String>) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::BadRequest(format!("missing query parameter {name}")))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CountsQuery {
    server_id: Option<String>,
    #[serde(rename = "type")]
    dimension: Option<String>,
    from: Option<String>,
    to: Option<String>,
}

impl CountsQuery {
    fn into_filter(self) -> Result<CountFilter, ApiError> {
        let filter = CountFilter {
            server_id: self.server_id,
            dimension: self.dimension.as_deref().map(parse_dimension).transpose()?,
            from: self.from.as_deref().map(|raw| parse_time("from", raw)).transpose()?,
            to: self.to.as_deref().map(|raw| parse_time("to", raw)).transpose()?,
        };

        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && from > to
        {
            return Err(ApiError::BadRequest("from must not be after to".to_string()));
        }

        Ok(filter)
    }
}

/// `GET /api/counts`
pub(crate) async fn list_counts_handler<S>(
    State(ApiState { store, .. }): State<ApiState<S>>,
    Query(query): Query<CountsQuery>,
) -> Result<Json<Vec<CountRecord>>, ApiError>
where
    S: CountStore,
{
    let filter = query.into_filter()?;
    let records = store.query(&filter).await.map_err(|e| store_error(&e))?;

    Ok(Json(records))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RecordQuery {
    server_id: Option<String>,
    #[serde(rename = "type")]
    dimension: Option<String>,
    value: Option<String>,
}

/// `GET /api/counts/record`
pub(crate) async fn get_record_handler<S>(
    State(ApiState { store, .. }): State<ApiState<S>>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<CountRecord>, ApiError>
where
    S: CountStore,
{
    let dimension = parse_dimension(&required("type", query.dimension)?)?;
    let key = GroupKey::new(
        required("server_id", query.server_id)?,
        dimension,
        required("value", query.value)?,
    );

    match store.get(&key).await.map_err(|e| store_error(&e))? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("no count recorded for {key}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TopQuery {
    limit: Option<String>,
}

impl TopQuery {
    fn limit(&self) -> Result<usize, ApiError> {
        self.limit.as_deref().map_or(Ok(DEFAULT_TOP_LIMIT), |raw| {
            raw.parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid limit {raw:?}")))
        })
    }
}

/// `GET /api/counts/top/ips`
pub(crate) async fn top_ips_handler<S>(
    State(ApiState { store, .. }): State<ApiState<S>>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<CountRecord>>, ApiError>
where
    S: CountStore,
{
    let records = store
        .top_ips(query.limit()?)
        .await
        .map_err(|e| store_error(&e))?;

    Ok(Json(records))
}

/// `GET /api/counts/top/endpoints`
pub(crate) async fn top_endpoints_handler<S>(
    State(ApiState { store, .. }): State<ApiState<S>>,
    Query(query): Query<TopQuery>,
) -> Result<Json<Vec<CountRecord>>, ApiError>
where
    S: CountStore,
{
    let records = store
        .top_endpoints(query.limit()?)
        .await
        .map_err(|e| store_error(&e))?;

    Ok(Json(records))
}

/// `GET /metrics`
pub(crate) async fn metrics_handler<S>(
    State(ApiState { registry, .. }): State<ApiState<S>>,
) -> Result<Response, ApiError>
where
    S: CountStore,
{
    let Some(registry) = registry else {
        return Err(ApiError::NotFound("metrics are not enabled".to_string()));
    };

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {e}")))?;

    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}
