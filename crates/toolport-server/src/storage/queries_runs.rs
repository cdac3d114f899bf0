//! Run queries.
//!
//! Every state transition is a single guarded `UPDATE`; callers learn whether
//! they won from `rows_affected` (or the `RETURNING` row) rather than from a
//! prior read.

use toolport_core::db::unix_timestamp;
use toolport_core::protocol::{RunOutcome, RunResult};

use super::db::{DatabaseError, PortalDatabase};
use super::models::{ClaimedRun, Run};

/// Fields for enqueueing a run.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub id: &'a str,
    pub tool_id: &'a str,
    pub requested_by: &'a str,
    pub target_machine_id: Option<&'a str>,
    pub run_token_hash: &'a str,
}

/// Predicate a completion must satisfy besides `status = 'running'`.
#[derive(Debug, Clone, Copy)]
pub enum FinishGuard<'a> {
    /// Machine-key report: the caller must own the claim.
    Machine(&'a str),
    /// Token callback: the stored token hash must still match.
    TokenHash(&'a str),
}

impl PortalDatabase {
    pub async fn insert_run(&self, run: &NewRun<'_>) -> Result<Run, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO runs (id, tool_id, requested_by, requested_at, status, target_machine_id, run_token_hash)
             VALUES (?, ?, ?, ?, 'queued', ?, ?)",
        )
        .bind(run.id)
        .bind(run.tool_id)
        .bind(run.requested_by)
        .bind(now)
        .bind(run.target_machine_id)
        .bind(run.run_token_hash)
        .execute(self.pool())
        .await?;

        self.get_run(run.id).await
    }

    /// Record a launch that completed on the user's side without dispatch.
    pub async fn insert_helper_run(
        &self,
        id: &str,
        tool_id: &str,
        requested_by: &str,
        run_token_hash: &str,
        summary: &str,
    ) -> Result<Run, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO runs (id, tool_id, requested_by, requested_at, status, run_token_hash, started_at, finished_at, summary)
             VALUES (?, ?, ?, ?, 'success', ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(tool_id)
        .bind(requested_by)
        .bind(now)
        .bind(run_token_hash)
        .bind(now)
        .bind(now)
        .bind(summary)
        .execute(self.pool())
        .await?;

        self.get_run(id).await
    }

    pub async fn get_run(&self, id: &str) -> Result<Run, DatabaseError> {
        sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Run {id}")))
    }

    /// Newest first, optionally restricted to one tool.
    pub async fn list_runs(
        &self,
        tool_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Run>, DatabaseError> {
        let runs = sqlx::query_as::<_, Run>(
            "SELECT * FROM runs WHERE (? IS NULL OR tool_id = ?)
             ORDER BY requested_at DESC, rowid DESC LIMIT ?",
        )
        .bind(tool_id)
        .bind(tool_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(runs)
    }

    /// Atomically move the oldest eligible queued run to `running` for
    /// `machine_id`, copying the tool's run config into `payload` if unset.
    ///
    /// Selection and update happen in one statement, so two machines can
    /// never both win the same row.
    pub async fn claim_next_run(
        &self,
        machine_id: &str,
        now: i64,
    ) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE runs
             SET status = 'running', machine_id = ?, claimed_at = ?,
                 payload = COALESCE(payload, (SELECT run_config FROM tools WHERE tools.id = runs.tool_id))
             WHERE id = (
                 SELECT id FROM runs
                 WHERE status = 'queued' AND (target_machine_id IS NULL OR target_machine_id = ?)
                 ORDER BY requested_at, rowid
                 LIMIT 1
             ) AND status = 'queued'
             RETURNING id",
        )
        .bind(machine_id)
        .bind(now)
        .bind(machine_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(id,)| id))
    }

    pub async fn get_claimed_run(&self, run_id: &str) -> Result<ClaimedRun, DatabaseError> {
        sqlx::query_as::<_, ClaimedRun>(
            "SELECT r.id AS run_id, r.payload, t.id AS tool_id, t.name AS tool_name,
                    t.tool_type, t.target AS tool_target, t.run_config AS tool_run_config
             FROM runs r JOIN tools t ON t.id = r.tool_id
             WHERE r.id = ?",
        )
        .bind(run_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Run {run_id}")))
    }

    /// Replace the token hash of a run still held by `machine_id`.
    pub async fn set_run_token_hash(
        &self,
        run_id: &str,
        machine_id: &str,
        run_token_hash: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE runs SET run_token_hash = ? WHERE id = ? AND machine_id = ? AND status = 'running'",
        )
        .bind(run_token_hash)
        .bind(run_id)
        .bind(machine_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a `running` run to its final outcome. Returns `false` if the run
    /// was no longer running or the guard did not match.
    pub async fn finish_run(
        &self,
        run_id: &str,
        guard: FinishGuard<'_>,
        outcome: RunOutcome,
        result: &RunResult,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let (guard_sql, guard_value) = match guard {
            FinishGuard::Machine(machine_id) => ("machine_id = ?", machine_id),
            FinishGuard::TokenHash(hash) => ("run_token_hash = ?", hash),
        };
        let sql = format!(
            "UPDATE runs
             SET status = ?, finished_at = ?, started_at = COALESCE(started_at, claimed_at),
                 summary = ?, error_message = ?, log_path = ?, log_url = ?
             WHERE id = ? AND status = 'running' AND {guard_sql}"
        );

        let done = sqlx::query(&sql)
            .bind(outcome.as_str())
            .bind(now)
            .bind(result.summary.as_deref())
            .bind(result.error_message.as_deref())
            .bind(result.log_path.as_deref())
            .bind(result.log_url.as_deref())
            .bind(run_id)
            .bind(guard_value)
            .execute(self.pool())
            .await?;

        Ok(done.rows_affected() > 0)
    }

    /// Cancel a run the requester still has queued.
    pub async fn cancel_run(
        &self,
        run_id: &str,
        requested_by: &str,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'canceled', finished_at = ?
             WHERE id = ? AND requested_by = ? AND status = 'queued'",
        )
        .bind(now)
        .bind(run_id)
        .bind(requested_by)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every run claimed before `cutoff` that is still `running`.
    /// Returns the ids of the runs that were expired.
    pub async fn expire_running_runs(
        &self,
        cutoff: i64,
        now: i64,
        message: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "UPDATE runs
             SET status = 'failed', finished_at = ?, started_at = COALESCE(started_at, claimed_at),
                 error_message = ?
             WHERE status = 'running' AND claimed_at < ?
             RETURNING id",
        )
        .bind(now)
        .bind(message)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
