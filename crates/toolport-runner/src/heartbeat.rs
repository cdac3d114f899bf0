//! Heartbeat task: keeps the machine online and relays operator commands.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use toolport_core::protocol::{HeartbeatRequest, MachineCommand};
use tracing::{debug, info, warn};

use crate::agent::{StopHandle, StopReason};
use crate::client::PortalClient;

/// Spawn the heartbeat loop. The first beat goes out immediately with
/// `starting = true` so the portal drops commands queued for a previous
/// process. A delivered `stop` trips `stop` and ends the task.
pub fn spawn_heartbeat_task(
    client: PortalClient,
    hostname: Option<String>,
    interval: Duration,
    stop: StopHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stopped = stop.subscribe();
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut starting = true;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let req = HeartbeatRequest {
                        hostname: hostname.clone(),
                        starting,
                    };
                    match client.heartbeat(&req).await {
                        Ok(resp) => {
                            starting = false;
                            debug!(machine_id = %resp.machine_id, "Heartbeat acknowledged");
                            if resp.command == Some(MachineCommand::Stop) {
                                info!(machine_id = %resp.machine_id, "Stop command received");
                                stop.stop(StopReason::Operator);
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Heartbeat failed"),
                    }
                }
                _ = stopped.changed() => {
                    info!("Heartbeat task shutting down");
                    return;
                }
            }
        }
    })
}
