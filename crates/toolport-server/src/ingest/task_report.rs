//! Task scheduler job reports: upsert the monitor, append history.

use serde_json::Value;
use toolport_core::db::unix_timestamp;
use toolport_core::protocol::TaskReportResponse;
use tracing::{info, warn};

use super::IngestError;
use super::fields::{as_object, one_of, optional_int, optional_str, optional_time, required_str};
use crate::storage::{DatabaseError, MonitorRunRecord, PortalDatabase, TaskMonitorUpsert};

/// Which branch wrote the monitor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorWrite {
    /// The atomic upsert matched or created the row.
    Upserted,
    /// The upsert failed; lookup found the row and it was updated.
    Updated,
    /// The upsert failed; lookup found nothing and a row was inserted.
    Inserted,
}

/// Validated task report.
#[derive(Debug)]
struct TaskReportFields<'a> {
    monitor: TaskMonitorUpsert<'a>,
    duration_ms: Option<i64>,
}

fn validate(body: &Value) -> Result<TaskReportFields<'_>, IngestError> {
    let obj = as_object(body)?;

    let task_key = required_str(obj, "task_key")?;
    let task_name = required_str(obj, "task_name")?;
    let kind = one_of(obj, "kind", &["python", "bat"])?;
    let status = one_of(obj, "status", &["success", "failed"])?;
    let started_at = optional_time(obj, "started_at")?;
    let finished_at = optional_time(obj, "finished_at")?;

    Ok(TaskReportFields {
        monitor: TaskMonitorUpsert {
            task_key,
            task_name,
            kind,
            machine_name: optional_str(obj, "machine_name"),
            status,
            started_at,
            finished_at,
            exit_code: optional_int(obj, "exit_code")?,
            message: optional_str(obj, "message"),
            log_url: optional_str(obj, "log_url"),
        },
        duration_ms: optional_int(obj, "duration_ms")?,
    })
}

/// Record one task report.
///
/// The monitor row is written by an explicit three-way decision: try the
/// atomic upsert; on a uniqueness conflict (it cannot see NULL-machine rows),
/// look the row up and update it, or insert it if absent. Any other storage
/// error fails the report. A history row is appended
/// either way; failing to write it does not fail the report.
pub async fn ingest_task_report(
    db: &PortalDatabase,
    body: &Value,
) -> Result<(TaskReportResponse, MonitorWrite), IngestError> {
    let report = validate(body)?;
    let m = &report.monitor;
    let now = unix_timestamp();
    let new_id = uuid::Uuid::new_v4().to_string();

    let (monitor_id, write) = match db.try_upsert_task_monitor(&new_id, m, now).await {
        Ok(id) => (id, MonitorWrite::Upserted),
        Err(e @ DatabaseError::Conflict(_)) => {
            warn!(task_key = m.task_key, error = %e, "Task monitor upsert conflicted, falling back to lookup");
            let existing = db
                .find_task_monitor(m.task_key, m.kind, m.machine_name)
                .await
                .map_err(IngestError::store("Failed to find or create task monitor"))?;
            match existing {
                Some(id) => {
                    db.update_task_monitor(&id, m, now)
                        .await
                        .map_err(IngestError::store("Failed to update task monitor"))?;
                    (id, MonitorWrite::Updated)
                }
                None => {
                    db.insert_task_monitor(&new_id, m, now)
                        .await
                        .map_err(IngestError::store("Failed to create task monitor"))?;
                    (new_id, MonitorWrite::Inserted)
                }
            }
        }
        Err(e) => return Err(IngestError::store("Failed to upsert task monitor")(e)),
    };

    let raw = body.to_string();
    let history = MonitorRunRecord {
        monitor_id: &monitor_id,
        status: m.status,
        started_at: m.started_at,
        finished_at: m.finished_at,
        duration_ms: report.duration_ms,
        exit_code: m.exit_code,
        message: m.message,
        log_url: m.log_url,
        raw: &raw,
    };
    let history_id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = db.insert_task_monitor_run(&history_id, &history, now).await {
        warn!(monitor_id = %monitor_id, error = %e, "Failed to append task monitor history");
    }

    info!(
        monitor_id = %monitor_id,
        task_key = m.task_key,
        status = m.status,
        write = ?write,
        "Task report ingested"
    );

    Ok((
        TaskReportResponse {
            ok: true,
            monitor_id,
            task_key: m.task_key.to_string(),
        },
        write,
    ))
}
