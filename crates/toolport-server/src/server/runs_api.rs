//! User-facing run endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use toolport_core::protocol::SuccessResponse;
use tracing::instrument;

use super::AppState;
use super::error::ApiError;
use super::extract::{AuthUser, non_empty, parse_json};
use crate::storage::Run;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
struct CreateRunBody {
    #[serde(default)]
    tool_id: Option<String>,
    #[serde(default)]
    target_machine_id: Option<String>,
}

impl CreateRunBody {
    fn tool_id(&mut self) -> Result<String, ApiError> {
        non_empty(self.tool_id.take()).ok_or_else(|| ApiError::bad_request("tool_id is required"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
    pub tool_id: Option<String>,
}

/// `POST /api/runs`
#[instrument(skip_all, fields(endpoint = "create_run", user_id = %user.sub))]
pub async fn create_run(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    let mut body: CreateRunBody = parse_json(&body)?;
    let tool_id = body.tool_id()?;
    let target = non_empty(body.target_machine_id.take());

    let run = state
        .dispatcher
        .create_run(&user, &tool_id, target.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// `POST /api/runs/helper`
#[instrument(skip_all, fields(endpoint = "helper_run", user_id = %user.sub))]
pub async fn record_helper_run(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    let mut body: CreateRunBody = parse_json(&body)?;
    let tool_id = body.tool_id()?;

    let run = state.dispatcher.record_helper_launch(&user, &tool_id).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// `POST /api/runs/{id}/cancel`
#[instrument(skip_all, fields(endpoint = "cancel_run", run_id = %id))]
pub async fn cancel_run(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.dispatcher.cancel_run(&user, &id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `GET /api/runs`
pub async fn list_runs(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let tool_id = non_empty(query.tool_id);
    Ok(Json(
        state
            .dispatcher
            .list_runs(tool_id.as_deref(), limit)
            .await?,
    ))
}

/// `GET /api/runs/{id}`
pub async fn get_run(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(state.dispatcher.get_run(&id).await?))
}
