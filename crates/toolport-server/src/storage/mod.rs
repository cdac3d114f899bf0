//! `SQLite` storage for the portal server.
//!
//! Machines, the tool projection, runs, task monitors and job status.

mod db;
mod models;
mod queries;
mod queries_monitors;
mod queries_runs;


pub use db::{DatabaseError, PortalDatabase};
pub use models::*;
pub use queries::NewTool;
pub use queries_monitors::{JobStatusUpsert, MonitorRunRecord, TaskMonitorUpsert};
pub use queries_runs::{FinishGuard, NewRun};
