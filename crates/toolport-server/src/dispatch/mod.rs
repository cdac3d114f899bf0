//! Run dispatch: machine credentials, the run state machine, claim,
//! heartbeat/command mailbox, result reporting and the claim lease.
//!
//! Every mutation is a single guarded statement; handlers re-read state
//! instead of trusting the caller.

mod claim;
mod error;
mod heartbeat;
pub mod lease;
mod registry;
mod report;
mod runs;
pub mod state;

#[cfg(test)]
mod tests;

use toolport_core::PortalConfig;

use crate::storage::PortalDatabase;

pub use error::DispatchError;
pub use runs::{MachineView, helper_summary};
pub use state::RunStatus;

/// Dispatch operations over the portal database.
#[derive(Clone)]
pub struct Dispatcher {
    db: PortalDatabase,
    callback_url: String,
    online_threshold_secs: i64,
}

impl Dispatcher {
    pub fn new(db: PortalDatabase, callback_url: impl Into<String>, online_threshold_secs: i64) -> Self {
        Self {
            db,
            callback_url: callback_url.into(),
            online_threshold_secs,
        }
    }

    pub fn from_config(db: PortalDatabase, config: &PortalConfig) -> Self {
        Self::new(
            db,
            config.callback_url(),
            config.dispatch.online_threshold_secs,
        )
    }

    pub const fn db(&self) -> &PortalDatabase {
        &self.db
    }

    /// Address handed to claimers for token callbacks.
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }
}
