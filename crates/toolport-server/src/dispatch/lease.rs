//! Claim lease: runs that stay `running` past the maximum duration are
//! failed so a crashed runner cannot strand them.

use std::time::Duration;

use tokio::task::JoinHandle;
use toolport_core::db::unix_timestamp;
use tracing::{info, warn};

use crate::storage::{DatabaseError, PortalDatabase};

/// Message stored on runs failed by the sweeper.
pub const LEASE_EXPIRED_MESSAGE: &str = "lease expired: runner did not report within the maximum running time";

/// Fail every run claimed more than `max_running_secs` before `now`.
/// A non-positive maximum disables the lease.
pub async fn expire_stale_runs(
    db: &PortalDatabase,
    max_running_secs: i64,
    now: i64,
) -> Result<Vec<String>, DatabaseError> {
    if max_running_secs <= 0 {
        return Ok(Vec::new());
    }
    let expired = db
        .expire_running_runs(now - max_running_secs, now, LEASE_EXPIRED_MESSAGE)
        .await?;
    for run_id in &expired {
        warn!(run_id = %run_id, max_running_secs, "Run lease expired");
    }
    Ok(expired)
}

/// Run [`expire_stale_runs`] every `interval_secs` until the task is aborted.
pub fn spawn_lease_sweeper(
    db: PortalDatabase,
    max_running_secs: i64,
    interval_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            match expire_stale_runs(&db, max_running_secs, unix_timestamp()).await {
                Ok(expired) if !expired.is_empty() => {
                    info!(expired = expired.len(), "Lease sweep completed");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Lease sweep failed");
                }
            }
        }
    })
}
