//! Run-token authenticated completion.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use toolport_core::protocol::SuccessResponse;
use tracing::instrument;

use super::AppState;
use super::error::ApiError;
use super::extract::{non_empty, parse_json};
use super::runner_api::CompletionBody;

/// `POST /api/runs/callback`
#[instrument(skip_all, fields(endpoint = "callback", run_id))]
pub async fn callback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, ApiError> {
    let mut body: CompletionBody = parse_json(&body)?;
    let (Some(run_id), Some(run_token), Some(status)) = (
        non_empty(body.run_id.take()),
        non_empty(body.run_token.take()),
        non_empty(body.status.take()),
    ) else {
        return Err(ApiError::bad_request(
            "run_id, run_token, and status are required",
        ));
    };
    let outcome = CompletionBody::outcome(&status)?;
    tracing::Span::current().record("run_id", run_id.as_str());

    state
        .dispatcher
        .callback(&run_id, &run_token, outcome, &body.result())
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}
