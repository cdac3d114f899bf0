//! toolport Portal Server Library
//!
//! Core functionality for the portal:
//! - `SQLite` storage for machines, tools, runs, task monitors and job status
//! - Access tokens for users and hashed secrets for machines and runs
//! - Run dispatch: claim, heartbeat, report, callback and the claim lease
//! - Ingestion of externally scheduled task and job reports
//! - The HTTP API tying it together

pub mod auth;
pub mod dispatch;
pub mod ingest;
pub mod server;
pub mod storage;
