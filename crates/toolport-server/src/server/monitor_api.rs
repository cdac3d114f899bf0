//! Ingestion webhooks and the monitoring read endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolport_core::protocol::{JobReportResponse, TaskReportResponse, WEBHOOK_SECRET_HEADER};
use tracing::instrument;

use super::AppState;
use super::error::ApiError;
use super::extract::{AuthUser, header_str, parse_json};
use crate::ingest::{self, verify_webhook_secret};
use crate::storage::{DatabaseError, JobStatus, TaskMonitor, TaskMonitorRun};

const DEFAULT_HISTORY_LIMIT: i64 = 10;
const MAX_HISTORY_LIMIT: i64 = 200;

fn authorize_webhook(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    verify_webhook_secret(
        state.webhook_secret.as_deref(),
        header_str(headers, WEBHOOK_SECRET_HEADER),
    )?;
    Ok(())
}

/// `POST /api/monitor/report`
#[instrument(skip_all, fields(endpoint = "task_report"))]
pub async fn task_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TaskReportResponse>, ApiError> {
    authorize_webhook(&state, &headers)?;
    let body: Value = parse_json(&body)?;
    let (resp, _) = ingest::ingest_task_report(state.db(), &body).await?;
    Ok(Json(resp))
}

/// `POST /api/monitor/job-report`
#[instrument(skip_all, fields(endpoint = "job_report"))]
pub async fn job_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JobReportResponse>, ApiError> {
    authorize_webhook(&state, &headers)?;
    let body: Value = parse_json(&body)?;
    Ok(Json(ingest::ingest_job_report(state.db(), &body).await?))
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// `GET /api/monitors`
pub async fn list_monitors(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<TaskMonitor>>, ApiError> {
    Ok(Json(state.db().list_task_monitors().await?))
}

/// `GET /api/monitors/{id}/runs`
pub async fn monitor_runs(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TaskMonitorRun>>, ApiError> {
    match state.db().get_task_monitor(&id).await {
        Ok(_) => {}
        Err(DatabaseError::NotFound(_)) => {
            return Err(ApiError::new(StatusCode::NOT_FOUND, "Task monitor not found"));
        }
        Err(e) => return Err(e.into()),
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.db().list_task_monitor_runs(&id, limit).await?))
}

/// `GET /api/monitors/failed-count`
pub async fn failed_monitor_count(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.db().count_failed_monitors().await?;
    Ok(Json(CountResponse { count }))
}

/// `GET /api/jobs`
pub async fn list_jobs(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<JobStatus>>, ApiError> {
    Ok(Json(state.db().list_job_statuses().await?))
}

/// `GET /api/jobs/error-count`
pub async fn job_error_count(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.db().count_job_errors().await?;
    Ok(Json(CountResponse { count }))
}
