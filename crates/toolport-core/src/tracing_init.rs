//! Tracing setup shared by the server and runner binaries.
//!
//! The filter comes from `TOOLPORT_LOG`, then `RUST_LOG`, then a per-binary
//! default that enables the binary's own crate and `toolport_core` at `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter variable that takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "TOOLPORT_LOG";

/// Default directives for the binary whose crate is `crate_name`.
pub fn default_directives(crate_name: &str) -> String {
    format!("{crate_name}=info,toolport_core=info")
}

/// Pick the directives to use. Blank variables count as unset.
fn resolve_directives(
    toolport_log: Option<String>,
    rust_log: Option<String>,
    crate_name: &str,
) -> String {
    toolport_log
        .into_iter()
        .chain(rust_log)
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_directives(crate_name))
}

/// Initialise the global subscriber for the binary `crate_name`
/// (pass `env!("CARGO_CRATE_NAME")`).
///
/// An unparsable filter falls back to the default directives and is
/// reported once the subscriber is up.
pub fn init_tracing(crate_name: &str, log_json: bool) {
    let directives = resolve_directives(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        crate_name,
    );
    let (env_filter, rejected) = match EnvFilter::try_new(&directives) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new(default_directives(crate_name)), Some(e)),
    };

    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Some(e) = rejected {
        tracing::warn!(filter = %directives, error = %e, "Invalid log filter, using defaults");
    }
}
