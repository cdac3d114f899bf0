//! `toolport` Core Library
//!
//! Shared functionality for toolport components:
//! - Wire protocol types spoken between the portal and its runners
//! - Configuration resolution for the portal server
//! - `SQLite` pool helpers and timestamp utilities
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod time;
pub mod tracing_init;

pub use config::PortalConfig;
pub use error::{Error, Result};
