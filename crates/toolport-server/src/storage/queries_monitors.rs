//! Task monitor and job status queries.

use super::db::{DatabaseError, PortalDatabase};
use super::models::{JobStatus, TaskMonitor, TaskMonitorRun};

/// Latest observed outcome of an externally scheduled task.
#[derive(Debug, Clone)]
pub struct TaskMonitorUpsert<'a> {
    pub task_key: &'a str,
    pub task_name: &'a str,
    pub kind: &'a str,
    pub machine_name: Option<&'a str>,
    pub status: &'a str,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub message: Option<&'a str>,
    pub log_url: Option<&'a str>,
}

/// One history row per ingestion call.
#[derive(Debug, Clone)]
pub struct MonitorRunRecord<'a> {
    pub monitor_id: &'a str,
    pub status: &'a str,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i64>,
    pub message: Option<&'a str>,
    pub log_url: Option<&'a str>,
    pub raw: &'a str,
}

#[derive(Debug, Clone)]
pub struct JobStatusUpsert<'a> {
    pub job_key: &'a str,
    pub title: &'a str,
    pub status: &'a str,
    pub finished_at: i64,
    pub tool_id: Option<&'a str>,
    pub message: Option<&'a str>,
}

impl PortalDatabase {
    // =========================================================================
    // Task monitors
    // =========================================================================

    /// Insert-or-update keyed on the `(task_key, kind, machine_name)` table
    /// constraint. Fails with a uniqueness error when `machine_name` is NULL
    /// and a matching row already exists; see [`Self::find_task_monitor`].
    pub async fn try_upsert_task_monitor(
        &self,
        new_id: &str,
        m: &TaskMonitorUpsert<'_>,
        now: i64,
    ) -> Result<String, DatabaseError> {
        let (id,): (String,) = sqlx::query_as(
            "INSERT INTO task_monitors
                 (id, task_key, task_name, kind, machine_name, last_status, last_started_at,
                  last_finished_at, last_exit_code, last_message, last_log_url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (task_key, kind, machine_name) DO UPDATE SET
                 task_name = excluded.task_name,
                 last_status = excluded.last_status,
                 last_started_at = excluded.last_started_at,
                 last_finished_at = excluded.last_finished_at,
                 last_exit_code = excluded.last_exit_code,
                 last_message = excluded.last_message,
                 last_log_url = excluded.last_log_url,
                 updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(new_id)
        .bind(m.task_key)
        .bind(m.task_name)
        .bind(m.kind)
        .bind(m.machine_name)
        .bind(m.status)
        .bind(m.started_at)
        .bind(m.finished_at)
        .bind(m.exit_code)
        .bind(m.message)
        .bind(m.log_url)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Find a monitor by identity. An absent `machine_name` matches only rows
    /// whose machine name is NULL.
    pub async fn find_task_monitor(
        &self,
        task_key: &str,
        kind: &str,
        machine_name: Option<&str>,
    ) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> = match machine_name {
            Some(name) => {
                sqlx::query_as(
                    "SELECT id FROM task_monitors WHERE task_key = ? AND kind = ? AND machine_name = ?",
                )
                .bind(task_key)
                .bind(kind)
                .bind(name)
                .fetch_optional(self.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id FROM task_monitors WHERE task_key = ? AND kind = ? AND machine_name IS NULL",
                )
                .bind(task_key)
                .bind(kind)
                .fetch_optional(self.pool())
                .await?
            }
        };

        Ok(row.map(|(id,)| id))
    }

    pub async fn update_task_monitor(
        &self,
        id: &str,
        m: &TaskMonitorUpsert<'_>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE task_monitors SET
                 task_name = ?, last_status = ?, last_started_at = ?, last_finished_at = ?,
                 last_exit_code = ?, last_message = ?, last_log_url = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(m.task_name)
        .bind(m.status)
        .bind(m.started_at)
        .bind(m.finished_at)
        .bind(m.exit_code)
        .bind(m.message)
        .bind(m.log_url)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_task_monitor(
        &self,
        id: &str,
        m: &TaskMonitorUpsert<'_>,
        now: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO task_monitors
                 (id, task_key, task_name, kind, machine_name, last_status, last_started_at,
                  last_finished_at, last_exit_code, last_message, last_log_url, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(m.task_key)
        .bind(m.task_name)
        .bind(m.kind)
        .bind(m.machine_name)
        .bind(m.status)
        .bind(m.started_at)
        .bind(m.finished_at)
        .bind(m.exit_code)
        .bind(m.message)
        .bind(m.log_url)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_task_monitor(&self, id: &str) -> Result<TaskMonitor, DatabaseError> {
        sqlx::query_as::<_, TaskMonitor>("SELECT * FROM task_monitors WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Task monitor {id}")))
    }

    /// Enabled monitors, most recently finished first.
    pub async fn list_task_monitors(&self) -> Result<Vec<TaskMonitor>, DatabaseError> {
        let monitors = sqlx::query_as::<_, TaskMonitor>(
            "SELECT * FROM task_monitors WHERE enabled = 1
             ORDER BY last_finished_at DESC NULLS LAST, task_name",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(monitors)
    }

    pub async fn count_failed_monitors(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM task_monitors WHERE enabled = 1 AND last_status = 'failed'",
        )
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    pub async fn insert_task_monitor_run(
        &self,
        id: &str,
        run: &MonitorRunRecord<'_>,
        now: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO task_monitor_runs
                 (id, monitor_id, status, started_at, finished_at, duration_ms, exit_code,
                  message, log_url, raw, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(run.monitor_id)
        .bind(run.status)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(run.exit_code)
        .bind(run.message)
        .bind(run.log_url)
        .bind(run.raw)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// History of one monitor, newest first.
    pub async fn list_task_monitor_runs(
        &self,
        monitor_id: &str,
        limit: i64,
    ) -> Result<Vec<TaskMonitorRun>, DatabaseError> {
        let runs = sqlx::query_as::<_, TaskMonitorRun>(
            "SELECT * FROM task_monitor_runs WHERE monitor_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(monitor_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(runs)
    }

    // =========================================================================
    // Job status
    // =========================================================================

    /// Plain upsert keyed by `job_key`. Returns the row id.
    pub async fn upsert_job_status(
        &self,
        new_id: &str,
        job: &JobStatusUpsert<'_>,
        now: i64,
    ) -> Result<String, DatabaseError> {
        let (id,): (String,) = sqlx::query_as(
            "INSERT INTO job_status
                 (id, job_key, title, tool_id, last_status, last_finished_at, last_message, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (job_key) DO UPDATE SET
                 title = excluded.title,
                 tool_id = excluded.tool_id,
                 last_status = excluded.last_status,
                 last_finished_at = excluded.last_finished_at,
                 last_message = excluded.last_message,
                 updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(new_id)
        .bind(job.job_key)
        .bind(job.title)
        .bind(job.tool_id)
        .bind(job.status)
        .bind(job.finished_at)
        .bind(job.message)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    pub async fn get_job_status(&self, job_key: &str) -> Result<JobStatus, DatabaseError> {
        sqlx::query_as::<_, JobStatus>("SELECT * FROM job_status WHERE job_key = ?")
            .bind(job_key)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Job {job_key}")))
    }

    /// Errors first, then most recently finished.
    pub async fn list_job_statuses(&self) -> Result<Vec<JobStatus>, DatabaseError> {
        let jobs = sqlx::query_as::<_, JobStatus>(
            "SELECT * FROM job_status
             ORDER BY CASE last_status WHEN 'error' THEN 0 ELSE 1 END, last_finished_at DESC",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(jobs)
    }

    pub async fn count_job_errors(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM job_status WHERE last_status = 'error'")
                .fetch_one(self.pool())
                .await?;

        Ok(count)
    }
}
