//! Operator machine endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use toolport_core::protocol::{MachineCommand, SuccessResponse};
use tracing::instrument;

use super::AppState;
use super::error::ApiError;
use super::extract::{AuthUser, parse_json};
use crate::dispatch::MachineView;

#[derive(Debug, Deserialize)]
pub struct ListMachinesQuery {
    #[serde(default)]
    pub online: bool,
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    #[serde(default)]
    command: Option<String>,
}

/// `GET /api/machines`
pub async fn list_machines(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ListMachinesQuery>,
) -> Result<Json<Vec<MachineView>>, ApiError> {
    Ok(Json(state.dispatcher.list_machines(query.online).await?))
}

/// `POST /api/machines/{id}/command`
#[instrument(skip_all, fields(endpoint = "machine_command", machine_id = %id))]
pub async fn send_command(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, ApiError> {
    let body: CommandBody = parse_json(&body)?;
    let command: MachineCommand = body
        .command
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::bad_request("command must be 'stop'"))?;

    state
        .dispatcher
        .set_machine_command(&user, &id, command)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}
