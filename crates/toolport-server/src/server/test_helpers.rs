//! Shared setup for the HTTP handler tests.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use toolport_core::PortalConfig;
use toolport_core::protocol::{MACHINE_KEY_HEADER, WEBHOOK_SECRET_HEADER};
use tower::ServiceExt;

use super::{AppState, build_router};
use crate::auth::hash_secret;
use crate::storage::{NewTool, PortalDatabase};

pub const KEY_A: &str = "machine-key-a";
pub const KEY_B: &str = "machine-key-b";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const QUEUE_TOOL: &str = "t-queue";
pub const HELPER_TOOL: &str = "t-helper";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

/// App over an in-memory database with two machines and two tools.
pub async fn test_app() -> TestApp {
    test_app_with(|config| {
        config.auth.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await
}

pub async fn test_app_with(configure: impl FnOnce(&mut PortalConfig)) -> TestApp {
    let mut config = PortalConfig::default();
    config.server.public_url = "http://portal.test".to_string();
    configure(&mut config);

    let db = PortalDatabase::open_in_memory().await.unwrap();
    db.create_machine("m-a", "runner-a", &hash_secret(KEY_A))
        .await
        .unwrap();
    db.create_machine("m-b", "runner-b", &hash_secret(KEY_B))
        .await
        .unwrap();
    for (id, mode, tool_type) in [(QUEUE_TOOL, "queue", "exe"), (HELPER_TOOL, "helper", "folder")] {
        db.create_tool(&NewTool {
            id,
            name: id,
            tool_type,
            target: Some("C:\\tools\\report.exe"),
            run_config: Some(r#"{"args":["/quiet"]}"#),
            execution_mode: mode,
        })
        .await
        .unwrap();
    }

    let state = AppState::new(db, &config);
    let router = build_router(state.clone());
    TestApp { state, router }
}

impl TestApp {
    /// Bearer header value for a user with the given role.
    pub fn bearer(&self, user_id: &str, role: &str) -> String {
        let (token, _) = self
            .state
            .jwt
            .issue_access_token(user_id, user_id, role)
            .unwrap();
        format!("Bearer {token}")
    }

    /// Send a request and return (status, JSON body or `Null` when empty).
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, headers: &[(&str, &str)], body: &str) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_as_machine(&self, uri: &str, key: &str, body: &str) -> (StatusCode, Value) {
        self.post(uri, &[(MACHINE_KEY_HEADER, key)], body).await
    }

    pub async fn post_webhook(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        self.post(uri, &[(WEBHOOK_SECRET_HEADER, WEBHOOK_SECRET)], body)
            .await
    }

    /// Queue a run of the queue tool as `user_id`, returning its id.
    pub async fn enqueue(&self, user_id: &str, target: Option<&str>) -> String {
        let auth = self.bearer(user_id, "operator");
        let body = match target {
            Some(t) => format!(r#"{{"tool_id":"{QUEUE_TOOL}","target_machine_id":"{t}"}}"#),
            None => format!(r#"{{"tool_id":"{QUEUE_TOOL}"}}"#),
        };
        let (status, run) = self
            .post("/api/runs", &[("authorization", &auth)], &body)
            .await;
        assert_eq!(status, StatusCode::CREATED, "{run}");
        run["id"].as_str().unwrap().to_string()
    }
}
