//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use toolport_core::protocol::ErrorResponse;
use tracing::error;

use crate::dispatch::DispatchError;
use crate::ingest::IngestError;
use crate::storage::DatabaseError;

/// Error returned by every handler, rendered as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn invalid_json() -> Self {
        Self::bad_request("Invalid JSON body")
    }

    fn internal(message: &str, cause: &dyn std::fmt::Display) -> Self {
        error!(error = %cause, "{message}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        use DispatchError as E;
        match e {
            E::MissingMachineKey => Self::unauthorized("X-Machine-Key header is required"),
            E::InvalidMachineKey => Self::unauthorized("Invalid machine key"),
            E::MachineDisabled => Self::new(StatusCode::FORBIDDEN, "Machine is disabled"),
            E::MachineNotFound(_) => Self::new(StatusCode::NOT_FOUND, "Machine not found"),
            E::RunNotFound(_) => Self::new(StatusCode::NOT_FOUND, "Run not found"),
            E::NotOwner(_) => Self::new(
                StatusCode::FORBIDDEN,
                "This run was not claimed by this machine",
            ),
            E::NotRunning { .. } => Self::bad_request("Only running status can be updated"),
            E::AlreadyCompleted(_) => Self::bad_request("Run is already completed"),
            E::InvalidRunToken => Self::unauthorized("Invalid run token"),
            E::NotCancelable { .. } => Self::bad_request("Only queued runs can be canceled"),
            E::ToolNotFound(_) => Self::new(StatusCode::NOT_FOUND, "Tool not found"),
            E::ToolArchived(_) => Self::bad_request("Tool is archived"),
            e @ E::WrongExecutionMode { .. } => Self::bad_request(capitalize(&e.to_string())),
            E::PermissionDenied(msg) => Self::new(StatusCode::FORBIDDEN, capitalize(&msg)),
            e @ E::MailboxContention(_) => Self::internal("Failed to update machine status", &e),
            e @ E::CorruptState(_) => Self::internal("Internal server error", &e),
            E::Database(e) => e.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            e @ IngestError::NotConfigured => Self::internal("Server configuration error", &e),
            IngestError::InvalidSecret => Self::unauthorized("Invalid or missing secret"),
            IngestError::Invalid(msg) => Self::bad_request(msg),
            IngestError::Store { context, source } => Self::internal(context, &source),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        Self::internal("Internal server error", &e)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
