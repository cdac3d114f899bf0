//! Status ingestion for jobs scheduled outside the claim queue.
//!
//! Callers authenticate with one shared secret. Bodies are validated field by
//! field from raw JSON so each failure names the offending field.

mod fields;
pub mod job_report;
pub mod task_report;


use tracing::error;

use crate::auth::secrets_match;
use crate::storage::DatabaseError;

pub use job_report::ingest_job_report;
pub use task_report::{MonitorWrite, ingest_task_report};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// No shared secret configured on the server.
    #[error("webhook secret is not configured")]
    NotConfigured,

    #[error("invalid or missing webhook secret")]
    InvalidSecret,

    /// Field-level validation failure; the message is returned to the caller.
    #[error("{0}")]
    Invalid(String),

    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: DatabaseError,
    },
}

impl IngestError {
    pub(crate) fn store(context: &'static str) -> impl FnOnce(DatabaseError) -> Self {
        move |source| Self::Store { context, source }
    }
}

/// Check the presented header against the configured shared secret.
pub fn verify_webhook_secret(
    configured: Option<&str>,
    presented: Option<&str>,
) -> Result<(), IngestError> {
    let Some(expected) = configured.filter(|s| !s.is_empty()) else {
        error!("Webhook secret is not configured");
        return Err(IngestError::NotConfigured);
    };
    match presented {
        Some(p) if secrets_match(p, expected) => Ok(()),
        _ => Err(IngestError::InvalidSecret),
    }
}
