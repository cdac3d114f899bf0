//! Poll loop: claim a run, execute it, report the result.
//!
//! Runs handed off to a detached flow are not reported here; the flow
//! completes them with the run token.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use toolport_core::protocol::{ClaimResponse, ReportRequest};
use tracing::{error, info, warn};

use crate::client::PortalClient;
use crate::config::RunnerConfig;
use crate::error::AgentError;
use crate::executor::{Execution, Executor};
use crate::heartbeat::spawn_heartbeat_task;

/// Transient report failures are retried this many times.
const REPORT_ATTEMPTS: u32 = 5;

/// Why the agent stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An operator sent `stop` through the heartbeat channel.
    Operator,
    /// Local shutdown (signal).
    Shutdown,
}

impl StopReason {
    /// Error recorded on a run interrupted for this reason.
    pub const fn message(self) -> &'static str {
        match self {
            Self::Operator => "runner stopped by operator",
            Self::Shutdown => "runner shut down",
        }
    }
}

/// Trips the agent's stop signal. The first reason wins.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<Option<StopReason>>>);

impl StopHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self(Arc::new(tx))
    }

    pub fn stop(&self, reason: StopReason) {
        self.0.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StopReason>> {
        self.0.subscribe()
    }
}

/// Runner agent for one machine.
pub struct Agent<E> {
    client: PortalClient,
    executor: E,
    config: RunnerConfig,
    stop: StopHandle,
}

impl<E: Executor> Agent<E> {
    pub fn new(client: PortalClient, executor: E, config: RunnerConfig) -> Self {
        Self {
            client,
            executor,
            config,
            stop: StopHandle::new(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run until stopped. Returns the stop reason, or an error when the
    /// portal rejects this machine or stays unreachable past the policy.
    pub async fn run(&self) -> Result<StopReason, AgentError> {
        info!(portal = %self.config.portal_url, "Runner agent starting");
        let heartbeat = spawn_heartbeat_task(
            self.client.clone(),
            self.config.hostname.clone(),
            self.config.heartbeat_interval,
            self.stop.clone(),
        );

        let result = self.poll_loop().await;
        heartbeat.abort();
        result
    }

    async fn poll_loop(&self) -> Result<StopReason, AgentError> {
        let mut stopped = self.stop.subscribe();
        let mut attempt: u32 = 0;

        loop {
            let current = *stopped.borrow_and_update();
            if let Some(reason) = current {
                info!(reason = ?reason, "Runner agent stopping");
                return Ok(reason);
            }

            // Not raced against stop: an abandoned claim would strand the run.
            match self.client.claim().await {
                Ok(Some(claim)) => {
                    attempt = 0;
                    if let Some(reason) = self.run_claim(claim, &mut stopped).await {
                        return Ok(reason);
                    }
                }
                Ok(None) => {
                    attempt = 0;
                    sleep_or_stop(self.config.poll_interval, &mut stopped).await;
                }
                Err(e) if !e.is_retryable() => {
                    error!(error = %e, "Portal rejected claim");
                    return Err(AgentError::Rejected(e));
                }
                Err(e) => {
                    if !self.config.reconnect.should_retry(attempt) {
                        error!(error = %e, attempt, "Max reconnect attempts reached");
                        return Err(AgentError::Unreachable {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.config.reconnect.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis(), "Claim failed, backing off");
                    attempt = attempt.saturating_add(1);
                    sleep_or_stop(delay, &mut stopped).await;
                }
            }
        }
    }

    /// Execute and report one claim. Returns the stop reason if the run was
    /// interrupted.
    async fn run_claim(
        &self,
        claim: ClaimResponse,
        stopped: &mut watch::Receiver<Option<StopReason>>,
    ) -> Option<StopReason> {
        info!(
            run_id = %claim.run_id,
            tool_id = %claim.tool.id,
            tool_type = %claim.tool.tool_type,
            "Run claimed"
        );

        // Dropping the execution future kills the child process.
        let finished = tokio::select! {
            execution = self.executor.execute(&claim) => Some(execution),
            _ = stopped.changed() => None,
        };
        let (execution, interrupted) = match finished {
            Some(execution) => (execution, None),
            None => {
                let reason = (*stopped.borrow_and_update()).unwrap_or(StopReason::Shutdown);
                warn!(run_id = %claim.run_id, reason = ?reason, "Killed in-flight run");
                (Execution::failed(reason.message()), Some(reason))
            }
        };

        match execution {
            Execution::Finished { outcome, result } => {
                let req = ReportRequest {
                    run_id: claim.run_id,
                    status: outcome,
                    result,
                };
                self.report(&req).await;
            }
            Execution::AwaitingCallback => {
                info!(run_id = %claim.run_id, "Run handed off, completion expected via callback");
            }
        }
        interrupted
    }

    async fn report(&self, req: &ReportRequest) {
        let run_id = req.run_id.as_str();

        let mut attempt: u32 = 0;
        loop {
            match self.client.report(req).await {
                Ok(()) => {
                    info!(run_id, status = req.status.as_str(), "Run reported");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < REPORT_ATTEMPTS => {
                    let delay = self.config.reconnect.delay_for_attempt(attempt);
                    warn!(run_id, error = %e, attempt, "Report failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(run_id, error = %e, "Failed to report run");
                    return;
                }
            }
        }
    }
}

async fn sleep_or_stop(delay: Duration, stopped: &mut watch::Receiver<Option<StopReason>>) {
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        _ = stopped.changed() => {}
    }
}
