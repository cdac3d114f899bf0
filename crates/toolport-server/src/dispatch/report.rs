use toolport_core::db::unix_timestamp;
use toolport_core::protocol::{RunOutcome, RunResult};
use tracing::info;

use super::{DispatchError, Dispatcher, RunStatus};
use crate::auth::matches_hash;
use crate::storage::{FinishGuard, Machine, Run};

impl Dispatcher {
    /// Machine-authenticated completion.
    ///
    /// Checks ownership before state, so a foreign machine is refused even
    /// for a run that already finished.
    pub async fn report(
        &self,
        machine: &Machine,
        run_id: &str,
        outcome: RunOutcome,
        result: &RunResult,
    ) -> Result<(), DispatchError> {
        let run = self.load_run(run_id).await?;

        if run.machine_id.as_deref() != Some(machine.id.as_str()) {
            return Err(DispatchError::NotOwner(run_id.to_string()));
        }

        let status = parse_status(&run)?;
        if !status.can_transition_to(outcome.into()) {
            return Err(DispatchError::NotRunning {
                run_id: run_id.to_string(),
                status: status.to_string(),
            });
        }

        let applied = self
            .db
            .finish_run(
                run_id,
                FinishGuard::Machine(&machine.id),
                outcome,
                result,
                unix_timestamp(),
            )
            .await?;
        if !applied {
            return Err(self.lost_race(run_id).await);
        }

        info!(run_id, machine_id = %machine.id, status = outcome.as_str(), "Run reported");
        Ok(())
    }

    /// Token-authenticated completion. Possession of the run token is the
    /// authorization; no machine identity is involved.
    pub async fn callback(
        &self,
        run_id: &str,
        run_token: &str,
        outcome: RunOutcome,
        result: &RunResult,
    ) -> Result<(), DispatchError> {
        let run = self.load_run(run_id).await?;

        if !matches_hash(run_token, &run.run_token_hash) {
            return Err(DispatchError::InvalidRunToken);
        }

        let status = parse_status(&run)?;
        if status.is_terminal() {
            return Err(DispatchError::AlreadyCompleted(run_id.to_string()));
        }
        if !status.can_transition_to(outcome.into()) {
            return Err(DispatchError::NotRunning {
                run_id: run_id.to_string(),
                status: status.to_string(),
            });
        }

        let applied = self
            .db
            .finish_run(
                run_id,
                FinishGuard::TokenHash(&run.run_token_hash),
                outcome,
                result,
                unix_timestamp(),
            )
            .await?;
        if !applied {
            return Err(self.lost_race(run_id).await);
        }

        info!(run_id, status = outcome.as_str(), "Run completed via callback");
        Ok(())
    }

    pub(super) async fn load_run(&self, run_id: &str) -> Result<Run, DispatchError> {
        self.db
            .get_run(run_id)
            .await
            .map_err(|e| DispatchError::not_found_as(e, || DispatchError::RunNotFound(run_id.to_string())))
    }

    /// Explain why a guarded completion matched no row.
    async fn lost_race(&self, run_id: &str) -> DispatchError {
        match self.db.get_run(run_id).await {
            Ok(run) => match run.status.parse::<RunStatus>() {
                Ok(status) if status.is_terminal() => {
                    DispatchError::AlreadyCompleted(run_id.to_string())
                }
                _ => DispatchError::NotRunning {
                    run_id: run_id.to_string(),
                    status: run.status,
                },
            },
            Err(e) => DispatchError::not_found_as(e, || DispatchError::RunNotFound(run_id.to_string())),
        }
    }
}

fn parse_status(run: &Run) -> Result<RunStatus, DispatchError> {
    run.status
        .parse()
        .map_err(|e: String| DispatchError::CorruptState(format!("run {}: {e}", run.id)))
}
