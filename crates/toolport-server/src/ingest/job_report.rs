//! Single-identifier job reports: plain upsert keyed by `job_key`.

use serde_json::Value;
use toolport_core::db::unix_timestamp;
use toolport_core::protocol::JobReportResponse;
use toolport_core::time::parse_iso8601;
use tracing::info;

use super::IngestError;
use super::fields::{as_object, invalid_date, one_of, optional_str, required_str};
use crate::storage::{JobStatusUpsert, PortalDatabase};

fn validate(body: &Value) -> Result<JobStatusUpsert<'_>, IngestError> {
    let obj = as_object(body)?;

    let job_key = required_str(obj, "job_key")?;
    let title = required_str(obj, "title")?;
    let status = one_of(obj, "status", &["success", "error"])?;
    let finished_at = match obj.get("finished_at") {
        Some(Value::String(s)) if !s.is_empty() => s,
        _ => {
            return Err(IngestError::Invalid(
                "finished_at is required and must be an ISO 8601 string".to_string(),
            ));
        }
    };
    let finished_at = parse_iso8601(finished_at).map_err(|_| invalid_date("finished_at"))?;

    Ok(JobStatusUpsert {
        job_key,
        title,
        status,
        finished_at,
        tool_id: optional_str(obj, "tool_id"),
        message: optional_str(obj, "message"),
    })
}

pub async fn ingest_job_report(
    db: &PortalDatabase,
    body: &Value,
) -> Result<JobReportResponse, IngestError> {
    let job = validate(body)?;
    let new_id = uuid::Uuid::new_v4().to_string();

    let id = db
        .upsert_job_status(&new_id, &job, unix_timestamp())
        .await
        .map_err(IngestError::store("Failed to update job status"))?;

    info!(job_key = job.job_key, status = job.status, "Job report ingested");

    Ok(JobReportResponse {
        success: true,
        id,
        job_key: job.job_key.to_string(),
    })
}
