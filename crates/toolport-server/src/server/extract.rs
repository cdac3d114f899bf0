//! Request parsing shared by the handlers.

use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use toolport_core::protocol::MACHINE_KEY_HEADER;

use super::AppState;
use super::error::ApiError;
use crate::auth::Claims;

/// Deserialize a request body, answering 400 `Invalid JSON body` on any
/// syntax or shape error.
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::invalid_json())
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn machine_key(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, MACHINE_KEY_HEADER)
}

/// Treat empty strings as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Authenticated user, from an `Authorization: Bearer <jwt>` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = header_str(&parts.headers, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let claims = state
            .jwt
            .validate(token)
            .map_err(|_| ApiError::unauthorized("Invalid token"))?;

        Ok(Self(claims))
    }
}
