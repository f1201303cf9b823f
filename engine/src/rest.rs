use crate::errors::{Error, Result};
use crate::metrics::{READINGS_TOTAL, VALID_READINGS_TOTAL};
use crate::model::{EnergyLimit, Notification, Reading, ReadingsResponse, UsageCheck, UsageReport};
use crate::store::{NotificationLedger, PgStore, Registry};
use crate::usage;
use crate::validate;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::error;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub store: PgStore,
    pub ingest_tx: mpsc::Sender<Reading>,
    pub api_key: String,
    pub renotify_min_secs: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/readings", post(submit_reading))
        .route("/api/v1/users/:user_id/usage", get(get_total_usage))
        .route("/api/v1/users/:user_id/usage/check", get(run_usage_check))
        .route("/api/v1/users/:user_id/limits", put(set_limits))
        .route(
            "/api/v1/users/:user_id/notifications",
            get(list_notifications).delete(clear_notifications),
        )
        .route(
            "/api/v1/users/:user_id/devices/:device_id/readings",
            get(device_readings),
        )
        .with_state(state)
}

/// Ingest endpoint for meters pushing over HTTP instead of MQTT.
/// Readings join the same batched pipeline, so the write is acknowledged
/// before it is durable.
async fn submit_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(reading): Json<Reading>,
) -> Result<(StatusCode, Json<Reading>)> {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if key != state.api_key {
        return Err(Error::Unauthorized("bad or missing API key".to_string()));
    }

    READINGS_TOTAL.inc();
    validate::validate(&reading)?;
    if !state.store.device_exists(&reading.device_id).await? {
        return Err(Error::NotFound(format!(
            "device {} not found",
            reading.device_id
        )));
    }

    state
        .ingest_tx
        .send(reading.clone())
        .await
        .map_err(|_| Error::ChannelSend)?;
    VALID_READINGS_TOTAL.inc();

    Ok((StatusCode::ACCEPTED, Json(reading)))
}

async fn get_total_usage(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UsageReport>> {
    Ok(Json(usage::total_usage(&state.store, user_id).await?))
}

async fn run_usage_check(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UsageCheck>> {
    let renotify_min = Duration::seconds(state.renotify_min_secs);
    Ok(Json(
        usage::check_usage(&state.store, user_id, renotify_min).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct LimitsBody {
    daily: Option<f64>,
    monthly: Option<f64>,
}

#[derive(Debug, Serialize)]
struct LimitsResponse {
    limits: EnergyLimit,
}

async fn set_limits(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<LimitsBody>,
) -> Result<Json<LimitsResponse>> {
    let limits = EnergyLimit {
        daily: body.daily,
        monthly: body.monthly,
    };
    validate::validate_limits(&limits)?;
    let limits = state.store.set_limits(user_id, limits).await?;
    Ok(Json(LimitsResponse { limits }))
}

async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Notification>>> {
    Ok(Json(state.store.list_all(user_id).await?))
}

#[derive(Debug, Serialize)]
struct ClearedResponse {
    cleared: u64,
}

/// The ledger only supports a full clear; there is no per-item "mark as
/// read" despite the `read` flag on each entry.
async fn clear_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ClearedResponse>> {
    let cleared = state.store.clear_all(user_id).await?;
    Ok(Json(ClearedResponse { cleared }))
}

#[derive(Debug, Deserialize)]
struct ReadingsQuery {
    limit: Option<usize>,
}

async fn device_readings(
    State(state): State<AppState>,
    Path((user_id, device_id)): Path<(Uuid, String)>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<ReadingsResponse>> {
    state.store.device_for_user(&device_id, user_id).await?;

    let limit = params.limit.unwrap_or(100).min(1000);
    let data = state.store.recent_readings(&device_id, limit).await?;

    Ok(Json(ReadingsResponse {
        total: data.len(),
        limit,
        data,
    }))
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::InvalidInput(_) | Error::Validation(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::StoreUnavailable(_) | Error::Migration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("API error: {}", self);
        }
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
