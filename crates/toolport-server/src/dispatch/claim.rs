use toolport_core::db::unix_timestamp;
use toolport_core::protocol::ClaimResponse;
use tracing::{info, warn};

use super::{DispatchError, Dispatcher};
use crate::auth::mint_secret;
use crate::storage::Machine;

impl Dispatcher {
    /// Hand the oldest eligible queued run to `machine`, or `None` when
    /// there is no work.
    ///
    /// The claim itself is one atomic statement. The fresh run token is
    /// written afterwards, guarded on this machine still holding the run.
    pub async fn claim(&self, machine: &Machine) -> Result<Option<ClaimResponse>, DispatchError> {
        let now = unix_timestamp();
        let Some(run_id) = self.db.claim_next_run(&machine.id, now).await? else {
            return Ok(None);
        };

        let (run_token, token_hash) = mint_secret();
        if !self
            .db
            .set_run_token_hash(&run_id, &machine.id, &token_hash)
            .await?
        {
            // Only the lease sweeper can take a freshly claimed run away.
            warn!(run_id = %run_id, machine_id = %machine.id, "Claimed run left running before token was stored");
            return Ok(None);
        }

        let claimed = self.db.get_claimed_run(&run_id).await?;

        info!(
            run_id = %run_id,
            machine_id = %machine.id,
            tool_id = %claimed.tool_id,
            "Run claimed"
        );

        Ok(Some(ClaimResponse {
            run_id,
            run_token,
            tool: claimed.tool(),
            payload: claimed.payload(),
            callback_url: self.callback_url.clone(),
        }))
    }
}
