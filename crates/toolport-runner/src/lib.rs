//! toolport Runner Library
//!
//! Reference agent for runner machines:
//! - HTTP client for the portal's runner protocol
//! - Heartbeat task that relays operator commands
//! - Poll loop that claims, executes and reports runs
//! - Child-process executor for script and executable tools

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod heartbeat;

pub use agent::{Agent, StopHandle, StopReason};
pub use client::PortalClient;
pub use config::{ReconnectPolicy, RunnerConfig};
pub use error::{AgentError, ClientError};
pub use executor::{Execution, Executor, ProcessExecutor};
