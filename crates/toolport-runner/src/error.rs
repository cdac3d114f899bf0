//! Runner error types.

use reqwest::StatusCode;

/// Errors talking to the portal.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Portal error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the same request may succeed later. Credential and validation
    /// rejections never will.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Config(_) => false,
        }
    }
}

/// Reasons the agent loop gives up.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Portal rejected the runner: {0}")]
    Rejected(ClientError),

    #[error("Portal unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: ClientError,
    },
}
