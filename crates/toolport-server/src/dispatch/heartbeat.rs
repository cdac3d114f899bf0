use toolport_core::db::unix_timestamp;
use toolport_core::protocol::{HeartbeatRequest, HeartbeatResponse, MachineCommand};
use tracing::{debug, info, warn};

use super::{DispatchError, Dispatcher};
use crate::storage::Machine;

/// Attempts before giving up on a mailbox that keeps changing underneath us.
const MAILBOX_ATTEMPTS: usize = 5;

impl Dispatcher {
    /// Refresh liveness and drain the command mailbox.
    ///
    /// The mailbox is emptied on every call. Its content is delivered unless
    /// the runner says it is `starting`, in which case a command issued before
    /// the restart is dropped.
    pub async fn heartbeat(
        &self,
        machine: &Machine,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, DispatchError> {
        let hostname = req
            .hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty());
        let now = unix_timestamp();

        let taken = self.take_pending_command(&machine.id, hostname, now).await?;

        let command = match taken {
            Some(raw) if req.starting => {
                info!(machine_id = %machine.id, command = %raw, "Discarded command pending across runner restart");
                None
            }
            Some(raw) => match raw.parse::<MachineCommand>() {
                Ok(cmd) => {
                    info!(machine_id = %machine.id, command = %cmd, "Delivering machine command");
                    Some(cmd)
                }
                Err(e) => {
                    warn!(machine_id = %machine.id, error = %e, "Dropped unrecognised machine command");
                    None
                }
            },
            None => None,
        };

        debug!(machine_id = %machine.id, starting = req.starting, "Heartbeat");

        Ok(HeartbeatResponse {
            success: true,
            machine_id: machine.id.clone(),
            machine_name: machine.name.clone(),
            command,
        })
    }

    /// Read the mailbox and clear it only if it still holds what was read.
    async fn take_pending_command(
        &self,
        machine_id: &str,
        hostname: Option<&str>,
        now: i64,
    ) -> Result<Option<String>, DispatchError> {
        for _ in 0..MAILBOX_ATTEMPTS {
            let current = self.db.get_pending_command(machine_id).await?;
            if self
                .db
                .touch_and_clear_command(machine_id, hostname, current.as_deref(), now)
                .await?
            {
                return Ok(current);
            }
        }
        Err(DispatchError::MailboxContention(machine_id.to_string()))
    }
}
