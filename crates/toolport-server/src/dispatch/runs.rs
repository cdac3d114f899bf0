//! User and operator actions on runs and machines.

use serde::Serialize;
use toolport_core::db::unix_timestamp;
use toolport_core::protocol::MachineCommand;
use tracing::info;

use super::{DispatchError, Dispatcher, RunStatus};
use crate::auth::{Claims, mint_secret};
use crate::storage::{Machine, NewRun, Run, Tool};

const MODE_QUEUE: &str = "queue";
const MODE_HELPER: &str = "helper";

/// Machine as listed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct MachineView {
    #[serde(flatten)]
    pub machine: Machine,
    pub online: bool,
}

/// Summary recorded for a helper launch of the given tool type.
pub fn helper_summary(tool_type: &str) -> &'static str {
    match tool_type {
        "excel" => "Opened in Excel",
        "bi" => "Opened Power BI report",
        "folder" => "Opened folder",
        "folder_set" => "Opened folder set",
        "shortcut" => "Ran shortcut",
        "exe" => "Started executable (local)",
        "bat" => "Ran batch file (local)",
        _ => "Launched",
    }
}

impl Dispatcher {
    /// Enqueue a run of a queue-mode tool.
    ///
    /// Pinning to a machine is reserved for operators. The run token minted
    /// here is never disclosed; claim replaces it.
    pub async fn create_run(
        &self,
        user: &Claims,
        tool_id: &str,
        target_machine_id: Option<&str>,
    ) -> Result<Run, DispatchError> {
        let tool = self.launchable_tool(tool_id, MODE_QUEUE).await?;

        let target = target_machine_id.map(str::trim).filter(|t| !t.is_empty());
        if let Some(machine_id) = target {
            if !user.can_operate() {
                return Err(DispatchError::PermissionDenied(
                    "only operators can pin a run to a machine".to_string(),
                ));
            }
            self.db.get_machine(machine_id).await.map_err(|e| {
                DispatchError::not_found_as(e, || DispatchError::MachineNotFound(machine_id.to_string()))
            })?;
        }

        let (_, token_hash) = mint_secret();
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = self
            .db
            .insert_run(&NewRun {
                id: &run_id,
                tool_id: &tool.id,
                requested_by: &user.sub,
                target_machine_id: target,
                run_token_hash: &token_hash,
            })
            .await?;

        info!(run_id = %run.id, tool_id = %tool.id, user_id = %user.sub, target = ?target, "Run queued");
        Ok(run)
    }

    /// Record that a helper-mode tool was launched on the user's own machine.
    pub async fn record_helper_launch(&self, user: &Claims, tool_id: &str) -> Result<Run, DispatchError> {
        let tool = self.launchable_tool(tool_id, MODE_HELPER).await?;

        let (_, token_hash) = mint_secret();
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = self
            .db
            .insert_helper_run(
                &run_id,
                &tool.id,
                &user.sub,
                &token_hash,
                helper_summary(&tool.tool_type),
            )
            .await?;

        info!(run_id = %run.id, tool_id = %tool.id, user_id = %user.sub, "Helper launch recorded");
        Ok(run)
    }

    /// Cancel a queued run. Only its requester may do so.
    pub async fn cancel_run(&self, user: &Claims, run_id: &str) -> Result<(), DispatchError> {
        let run = self.load_run(run_id).await?;

        if run.requested_by != user.sub {
            return Err(DispatchError::PermissionDenied(
                "only the requester can cancel a run".to_string(),
            ));
        }
        if run.status != RunStatus::Queued.as_str() {
            return Err(DispatchError::NotCancelable {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        if !self.db.cancel_run(run_id, &user.sub, unix_timestamp()).await? {
            // Claimed between the read and the write.
            let current = self.load_run(run_id).await?;
            return Err(DispatchError::NotCancelable {
                run_id: run_id.to_string(),
                status: current.status,
            });
        }

        info!(run_id, user_id = %user.sub, "Run canceled");
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run, DispatchError> {
        self.load_run(run_id).await
    }

    pub async fn list_runs(&self, tool_id: Option<&str>, limit: i64) -> Result<Vec<Run>, DispatchError> {
        Ok(self.db.list_runs(tool_id, limit).await?)
    }

    /// All machines with their derived liveness, optionally only online ones.
    pub async fn list_machines(&self, online_only: bool) -> Result<Vec<MachineView>, DispatchError> {
        let now = unix_timestamp();
        let views = self
            .db
            .list_machines()
            .await?
            .into_iter()
            .map(|machine| MachineView {
                online: machine.is_online(now, self.online_threshold_secs),
                machine,
            })
            .filter(|view| !online_only || view.online)
            .collect();
        Ok(views)
    }

    /// Place `command` in the machine's mailbox, replacing anything undelivered.
    pub async fn set_machine_command(
        &self,
        user: &Claims,
        machine_id: &str,
        command: MachineCommand,
    ) -> Result<(), DispatchError> {
        if !user.can_operate() {
            return Err(DispatchError::PermissionDenied(
                "only operators can command machines".to_string(),
            ));
        }

        if !self.db.set_pending_command(machine_id, command.as_str()).await? {
            return Err(DispatchError::MachineNotFound(machine_id.to_string()));
        }

        info!(machine_id, command = %command, user_id = %user.sub, "Machine command queued");
        Ok(())
    }

    async fn launchable_tool(&self, tool_id: &str, mode: &str) -> Result<Tool, DispatchError> {
        let tool = self.db.get_tool(tool_id).await.map_err(|e| {
            DispatchError::not_found_as(e, || DispatchError::ToolNotFound(tool_id.to_string()))
        })?;

        if tool.is_archived {
            return Err(DispatchError::ToolArchived(tool.id));
        }
        if tool.execution_mode != mode {
            return Err(DispatchError::WrongExecutionMode {
                tool_id: tool.id,
                mode: tool.execution_mode,
            });
        }
        Ok(tool)
    }
}
