use std::collections::BTreeMap;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use utoipa::OpenApi;
use uuid::Uuid;

use super::{
    dto::{
        AlertDto, PipelineResultDto, ReadingDto, RegisterTokenRequest, SubmitReadingRequest,
        TargetDto, TestNotificationRequest, UnreadCountDto,
    },
    errors::AppError,
    AppState,
};
use crate::{
    alerts::{Admission, Verdict},
    db::models::{AlertKind, ReadingStats},
    notify::{
        fanout::remove_invalid_targets, DispatchReport, FailedDelivery, FailureReason,
        NotificationPayload,
    },
    pipeline::{PipelineError, TerminalState},
    readings::ReadingSubmission,
};

/// Number of readings returned by `GET /api/gas`.
const RECENT_READINGS_LIMIT: i64 = 100;

/// Keeps a test message well inside FCM's 4 KB payload limit.
const MAX_TITLE_CHARS: usize = 100;
const MAX_BODY_CHARS: usize = 1000;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Submit one gas reading. Runs the full alert pipeline: store, evaluate,
/// throttle, record alert, notify.
///
/// The pipeline runs on its own task, so a client that disconnects after the
/// reading was stored cannot cancel the alert stages.
#[utoipa::path(
    post,
    path = "/api/gas",
    request_body = SubmitReadingRequest,
    responses(
        (status = 201, description = "Reading stored; alert stages reported", body = PipelineResultDto),
        (status = 400, description = "Invalid reading"),
        (status = 503, description = "Reading could not be stored"),
    ),
    tag = "readings"
)]
pub async fn submit_reading(
    State(state): State<AppState>,
    payload: Result<Json<SubmitReadingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PipelineResultDto>), AppError> {
    let Json(request) = payload
        .map_err(|e| AppError::bad_request(format!("invalid reading: {}", e.body_text())))?;
    let submission = ReadingSubmission::try_from(request)
        .map_err(|e| AppError::from_pipeline(PipelineError::Rejected(e)))?;

    let pipeline = state.pipeline.clone();
    let targets = state.targets.clone();

    let result = tokio::spawn(async move {
        let result = pipeline.submit(submission).await;
        if let Ok(outcome) = &result {
            if let Some(report) = &outcome.dispatch {
                remove_invalid_targets(targets.as_ref(), report).await;
            }
        }
        result
    })
    .await
    .context("reading pipeline task failed")?;

    let outcome = result.map_err(AppError::from_pipeline)?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// The most recent readings across all devices, newest first.
#[utoipa::path(
    get,
    path = "/api/gas",
    responses(
        (status = 200, description = "Latest 100 readings", body = Vec<ReadingDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn list_readings(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReadingDto>>, AppError> {
    let rows = state.readings.recent_readings(RECENT_READINGS_LIMIT).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// All readings for one device, newest first.
#[utoipa::path(
    get,
    path = "/api/gas/{device_id}",
    params(
        ("device_id" = String, Path, description = "Sensor device ID"),
    ),
    responses(
        (status = 200, description = "Device readings", body = Vec<ReadingDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn device_readings(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<ReadingDto>>, AppError> {
    let rows = state.readings.device_readings(&device_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Count, average, minimum and maximum of a device's readings.
#[utoipa::path(
    get,
    path = "/api/gas/{device_id}/statistics",
    params(
        ("device_id" = String, Path, description = "Sensor device ID"),
    ),
    responses(
        (status = 200, description = "Reading statistics (all zero when no readings)", body = ReadingStats),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn device_statistics(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<ReadingStats>, AppError> {
    Ok(Json(state.readings.device_statistics(&device_id).await?))
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/alerts",
    responses(
        (status = 200, description = "All alerts, newest first", body = Vec<AlertDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn list_alerts(State(state): State<AppState>) -> Result<Json<Vec<AlertDto>>, AppError> {
    let rows = state.alerts.list_alerts().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/alerts/unread-count",
    responses(
        (status = 200, description = "Number of unacknowledged alerts", body = UnreadCountDto),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn unread_count(State(state): State<AppState>) -> Result<Json<UnreadCountDto>, AppError> {
    let unread = state.alerts.unread_count().await?;
    Ok(Json(UnreadCountDto { unread }))
}

#[utoipa::path(
    patch,
    path = "/api/alerts/{id}/acknowledge",
    params(
        ("id" = Uuid, Path, description = "Alert ID"),
    ),
    responses(
        (status = 200, description = "Acknowledged alert", body = AlertDto),
        (status = 404, description = "Alert not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AlertDto>, AppError> {
    state
        .alerts
        .acknowledge_alert(id)
        .await?
        .map(|alert| Json(alert.into()))
        .ok_or_else(|| AppError::not_found(format!("alert {id}")))
}

#[utoipa::path(
    delete,
    path = "/api/alerts/{id}",
    params(
        ("id" = Uuid, Path, description = "Alert ID"),
    ),
    responses(
        (status = 204, description = "Alert deleted"),
        (status = 404, description = "Alert not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.alerts.delete_alert(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("alert {id}")))
    }
}

// ---------------------------------------------------------------------------
// Notification targets
// ---------------------------------------------------------------------------

/// Register or replace the push token for a user.
#[utoipa::path(
    post,
    path = "/api/tokens",
    request_body = RegisterTokenRequest,
    responses(
        (status = 200, description = "Token saved", body = TargetDto),
        (status = 400, description = "user_id or fcm_token missing"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "notifications"
)]
pub async fn register_token(
    State(state): State<AppState>,
    Json(request): Json<RegisterTokenRequest>,
) -> Result<Json<TargetDto>, AppError> {
    let user_id = request.user_id.trim();
    let fcm_token = request.fcm_token.trim();
    if user_id.is_empty() || fcm_token.is_empty() {
        return Err(AppError::bad_request("user_id and fcm_token are required"));
    }

    let target = state.targets.upsert_target(user_id, fcm_token).await?;
    Ok(Json(target.into()))
}

#[utoipa::path(
    get,
    path = "/api/tokens",
    responses(
        (status = 200, description = "Registered targets, most recently updated first", body = Vec<TargetDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "notifications"
)]
pub async fn list_tokens(State(state): State<AppState>) -> Result<Json<Vec<TargetDto>>, AppError> {
    let rows = state.targets.list_active_targets().await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    delete,
    path = "/api/tokens/{user_id}",
    params(
        ("user_id" = String, Path, description = "User whose token is removed"),
    ),
    responses(
        (status = 204, description = "Token removed"),
        (status = 404, description = "No token for this user"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "notifications"
)]
pub async fn remove_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.targets.remove_target(&user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("token for user {user_id}")))
    }
}

/// Send a test notification to every registered target and report the
/// per-target outcome. Invalid tokens found this way are removed.
#[utoipa::path(
    post,
    path = "/api/notifications/test",
    request_body = TestNotificationRequest,
    responses(
        (status = 200, description = "Delivery report", body = DispatchReport),
        (status = 400, description = "Title or body too long"),
    ),
    tag = "notifications"
)]
pub async fn test_notification(
    State(state): State<AppState>,
    Json(request): Json<TestNotificationRequest>,
) -> Result<Json<DispatchReport>, AppError> {
    let title = request
        .title
        .unwrap_or_else(|| "Test notification".to_owned());
    let body = request
        .body
        .unwrap_or_else(|| "Gas detector notifications are working.".to_owned());
    if title.chars().count() > MAX_TITLE_CHARS || body.chars().count() > MAX_BODY_CHARS {
        return Err(AppError::bad_request(format!(
            "title is limited to {MAX_TITLE_CHARS} and body to {MAX_BODY_CHARS} characters"
        )));
    }

    let payload = NotificationPayload {
        title,
        body,
        data: BTreeMap::from([("test".to_owned(), "true".to_owned())]),
    };

    let report = state.pipeline.fanout().deliver(&payload).await;
    remove_invalid_targets(state.targets.as_ref(), &report).await;
    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_reading,
        list_readings,
        device_readings,
        device_statistics,
        list_alerts,
        unread_count,
        acknowledge_alert,
        delete_alert,
        register_token,
        list_tokens,
        remove_token,
        test_notification,
        health,
    ),
    components(schemas(
        SubmitReadingRequest,
        ReadingDto,
        ReadingStats,
        AlertDto,
        AlertKind,
        PipelineResultDto,
        TerminalState,
        Verdict,
        Admission,
        DispatchReport,
        FailedDelivery,
        FailureReason,
        UnreadCountDto,
        RegisterTokenRequest,
        TargetDto,
        TestNotificationRequest,
    )),
    tags(
        (name = "readings",      description = "Gas reading ingest and history"),
        (name = "alerts",        description = "Gas leak alerts"),
        (name = "notifications", description = "Push notification targets"),
        (name = "system",        description = "System endpoints"),
    ),
    info(
        title = "Gas Alert Service API",
        version = "0.1.0",
        description = "REST API for gas sensor readings, leak alerts and push notifications"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
