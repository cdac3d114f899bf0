//! HTTP API for runners, execution backends, ingestion webhooks and users.

mod callback_api;
pub mod error;
mod extract;
mod health;
mod machines_api;
mod monitor_api;
mod runner_api;
mod runs_api;

#[cfg(test)]
mod test_helpers;
#[cfg(test)]
mod runner_api_tests;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use toolport_core::PortalConfig;
use toolport_core::protocol::{
    CALLBACK_PATH, CLAIM_PATH, HEARTBEAT_PATH, JOB_REPORT_PATH, REPORT_PATH, TASK_REPORT_PATH,
};
use tower_http::trace::TraceLayer;

use crate::auth::JwtManager;
use crate::dispatch::Dispatcher;
use crate::storage::PortalDatabase;

pub use error::ApiError;

/// Shared handler state. Secrets and policy come from configuration here,
/// never from process globals.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub jwt: Arc<JwtManager>,
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(db: PortalDatabase, config: &PortalConfig) -> Self {
        Self {
            dispatcher: Dispatcher::from_config(db, config),
            jwt: Arc::new(JwtManager::new(
                config.auth.jwt_secret.as_bytes(),
                config.auth.access_ttl_secs,
            )),
            webhook_secret: config
                .auth
                .webhook_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(Arc::from),
        }
    }

    pub const fn db(&self) -> &PortalDatabase {
        self.dispatcher.db()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // Runner protocol
        .route(CLAIM_PATH, post(runner_api::claim))
        .route(HEARTBEAT_PATH, post(runner_api::heartbeat))
        .route(REPORT_PATH, post(runner_api::report))
        .route(CALLBACK_PATH, post(callback_api::callback))
        // Ingestion
        .route(TASK_REPORT_PATH, post(monitor_api::task_report))
        .route(JOB_REPORT_PATH, post(monitor_api::job_report))
        // Users and operators
        .route("/api/runs", get(runs_api::list_runs).post(runs_api::create_run))
        .route("/api/runs/helper", post(runs_api::record_helper_run))
        .route("/api/runs/{id}", get(runs_api::get_run))
        .route("/api/runs/{id}/cancel", post(runs_api::cancel_run))
        .route("/api/machines", get(machines_api::list_machines))
        .route("/api/machines/{id}/command", post(machines_api::send_command))
        .route("/api/monitors", get(monitor_api::list_monitors))
        .route("/api/monitors/failed-count", get(monitor_api::failed_monitor_count))
        .route("/api/monitors/{id}/runs", get(monitor_api::monitor_runs))
        .route("/api/jobs", get(monitor_api::list_jobs))
        .route("/api/jobs/error-count", get(monitor_api::job_error_count))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
