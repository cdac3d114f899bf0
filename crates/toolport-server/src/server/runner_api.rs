//! Machine-key authenticated runner endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use toolport_core::protocol::{HeartbeatRequest, HeartbeatResponse, RunOutcome, RunResult, SuccessResponse};
use tracing::instrument;

use super::AppState;
use super::error::ApiError;
use super::extract::{machine_key, non_empty, parse_json};

/// `POST /api/runner/claim`: 200 with a run, or 204 when the queue is empty.
#[instrument(skip_all, fields(endpoint = "claim"))]
pub async fn claim(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let machine = state
        .dispatcher
        .authenticate_machine(machine_key(&headers))
        .await?;

    match state.dispatcher.claim(&machine).await? {
        Some(claimed) => Ok(Json(claimed).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `POST /api/runner/heartbeat`. The body is optional.
#[instrument(skip_all, fields(endpoint = "heartbeat"))]
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let machine = state
        .dispatcher
        .authenticate_machine(machine_key(&headers))
        .await?;

    let req: HeartbeatRequest = if body.iter().all(u8::is_ascii_whitespace) {
        HeartbeatRequest::default()
    } else {
        parse_json(&body)?
    };

    Ok(Json(state.dispatcher.heartbeat(&machine, &req).await?))
}

/// Completion body before validation. Field errors are reported one by one
/// instead of as a generic parse failure.
#[derive(Debug, Deserialize)]
pub(super) struct CompletionBody {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub run_token: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub result: RunResult,
}

impl CompletionBody {
    pub fn outcome(status: &str) -> Result<RunOutcome, ApiError> {
        status
            .parse()
            .map_err(|_| ApiError::bad_request("status must be 'success' or 'failed'"))
    }

    pub fn result(self) -> RunResult {
        RunResult {
            summary: non_empty(self.result.summary),
            error_message: non_empty(self.result.error_message),
            log_path: non_empty(self.result.log_path),
            log_url: non_empty(self.result.log_url),
        }
    }
}

/// `POST /api/runner/report`
#[instrument(skip_all, fields(endpoint = "report", run_id))]
pub async fn report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SuccessResponse>, ApiError> {
    let machine = state
        .dispatcher
        .authenticate_machine(machine_key(&headers))
        .await?;

    let mut body: CompletionBody = parse_json(&body)?;
    let (Some(run_id), Some(status)) = (non_empty(body.run_id.take()), non_empty(body.status.take()))
    else {
        return Err(ApiError::bad_request("run_id and status are required"));
    };
    let outcome = CompletionBody::outcome(&status)?;
    tracing::Span::current().record("run_id", run_id.as_str());

    state
        .dispatcher
        .report(&machine, &run_id, outcome, &body.result())
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}
