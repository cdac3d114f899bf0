use axum::http::StatusCode;
use serde_json::json;
use toolport_core::protocol::{CALLBACK_PATH, CLAIM_PATH, HEARTBEAT_PATH, REPORT_PATH};

use super::test_helpers::{KEY_A, KEY_B, test_app};

// === Claim ===

#[tokio::test]
async fn claim_requires_a_valid_enabled_machine() {
    let app = test_app().await;

    let (status, body) = app.post(CLAIM_PATH, &[], "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "X-Machine-Key header is required");

    let (status, body) = app.post_as_machine(CLAIM_PATH, "bogus", "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid machine key");

    app.state.db().set_machine_enabled("m-a", false).await.unwrap();
    let (status, body) = app.post_as_machine(CLAIM_PATH, KEY_A, "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Machine is disabled");
}

#[tokio::test]
async fn empty_queue_is_no_content() {
    let app = test_app().await;
    let (status, body) = app.post_as_machine(CLAIM_PATH, KEY_A, "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
}

#[tokio::test]
async fn claim_returns_tool_payload_and_callback() {
    let app = test_app().await;
    let run_id = app.enqueue("alice", None).await;

    let (status, body) = app.post_as_machine(CLAIM_PATH, KEY_A, "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_id"], run_id.as_str());
    assert_eq!(body["tool"]["tool_type"], "exe");
    assert_eq!(body["tool"]["target"], "C:\\tools\\report.exe");
    assert_eq!(body["payload"]["args"][0], "/quiet");
    assert_eq!(body["callback_url"], "http://portal.test/api/runs/callback");
    assert_eq!(body["run_token"].as_str().unwrap().len(), 64);
}

// === Report ===

#[tokio::test]
async fn end_to_end_claim_report_and_replay() {
    let app = test_app().await;
    let run_id = app.enqueue("alice", None).await;

    let (status, _) = app.post_as_machine(CLAIM_PATH, KEY_A, "").await;
    assert_eq!(status, StatusCode::OK);

    let report = json!({"run_id": run_id, "status": "success", "summary": "42 rows"}).to_string();

    let (status, body) = app.post_as_machine(REPORT_PATH, KEY_B, &report).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "This run was not claimed by this machine");

    let (status, body) = app.post_as_machine(REPORT_PATH, KEY_A, &report).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let run = app.state.db().get_run(&run_id).await.unwrap();
    assert_eq!(run.status, "success");
    assert_eq!(run.summary.as_deref(), Some("42 rows"));
    let finished_at = run.finished_at;
    assert!(finished_at.is_some());

    let (status, body) = app.post_as_machine(REPORT_PATH, KEY_A, &report).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Only running status can be updated");
    assert_eq!(app.state.db().get_run(&run_id).await.unwrap().finished_at, finished_at);

    // Ownership is checked before state.
    let (status, _) = app.post_as_machine(REPORT_PATH, KEY_B, &report).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn report_validation() {
    let app = test_app().await;

    let (status, body) = app.post_as_machine(REPORT_PATH, KEY_A, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid JSON body");

    let (status, body) = app
        .post_as_machine(REPORT_PATH, KEY_A, r#"{"status":"success"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "run_id and status are required");

    let (status, body) = app
        .post_as_machine(REPORT_PATH, KEY_A, r#"{"run_id":"r","status":"canceled"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "status must be 'success' or 'failed'");

    let (status, body) = app
        .post_as_machine(REPORT_PATH, KEY_A, r#"{"run_id":"missing","status":"failed"}"#)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Run not found");

    // Credentials are checked before the body is read.
    let (status, _) = app.post_as_machine(REPORT_PATH, "bogus", "{not json").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// === Callback ===

#[tokio::test]
async fn callback_is_token_gated() {
    let app = test_app().await;
    let run_id = app.enqueue("alice", None).await;
    let (_, claim) = app.post_as_machine(CLAIM_PATH, KEY_A, "").await;
    let token = claim["run_token"].as_str().unwrap();

    let (status, body) = app
        .post(CALLBACK_PATH, &[], &json!({"run_id": run_id, "status": "success"}).to_string())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "run_id, run_token, and status are required");

    let (status, _) = app
        .post(
            CALLBACK_PATH,
            &[],
            &json!({"run_id": "missing", "run_token": token, "status": "success"}).to_string(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .post(
            CALLBACK_PATH,
            &[],
            &json!({"run_id": run_id, "run_token": "forged", "status": "success"}).to_string(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid run token");

    let ok = json!({
        "run_id": run_id,
        "run_token": token,
        "status": "failed",
        "error_message": "flow timed out",
        "log_url": "",
    })
    .to_string();
    let (status, _) = app.post(CALLBACK_PATH, &[], &ok).await;
    assert_eq!(status, StatusCode::OK);

    let run = app.state.db().get_run(&run_id).await.unwrap();
    assert_eq!(run.status, "failed");
    assert_eq!(run.error_message.as_deref(), Some("flow timed out"));
    assert!(run.log_url.is_none());

    let (status, body) = app.post(CALLBACK_PATH, &[], &ok).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Run is already completed");
}

// === Heartbeat ===

#[tokio::test]
async fn heartbeat_body_is_optional() {
    let app = test_app().await;
    let (status, body) = app.post_as_machine(HEARTBEAT_PATH, KEY_A, "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["machine_id"], "m-a");
    assert_eq!(body["machine_name"], "runner-a");
    assert!(body["command"].is_null());

    let (status, _) = app.post_as_machine(HEARTBEAT_PATH, KEY_A, "[").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stop_command_round_trip() {
    let app = test_app().await;
    let operator = app.bearer("op", "operator");
    let user = app.bearer("alice", "user");

    let (status, _) = app
        .post("/api/machines/m-a/command", &[("authorization", &user)], r#"{"command":"stop"}"#)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post("/api/machines/m-a/command", &[("authorization", &operator)], r#"{"command":"reboot"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "command must be 'stop'");

    let (status, _) = app
        .post("/api/machines/m-zz/command", &[("authorization", &operator)], r#"{"command":"stop"}"#)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/machines/m-a/command", &[("authorization", &operator)], r#"{"command":"stop"}"#)
        .await;
    assert_eq!(status, StatusCode::OK);

    let beat = r#"{"hostname":"HOST-A","starting":false}"#;
    let (_, body) = app.post_as_machine(HEARTBEAT_PATH, KEY_A, beat).await;
    assert_eq!(body["command"], "stop");
    let (_, body) = app.post_as_machine(HEARTBEAT_PATH, KEY_A, beat).await;
    assert!(body["command"].is_null());
}

#[tokio::test]
async fn starting_heartbeat_drops_stale_command() {
    let app = test_app().await;
    let operator = app.bearer("op", "admin");
    app.post("/api/machines/m-a/command", &[("authorization", &operator)], r#"{"command":"stop"}"#)
        .await;

    let (status, body) = app
        .post_as_machine(HEARTBEAT_PATH, KEY_A, r#"{"starting":true}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["command"].is_null());
    assert!(app.state.db().get_pending_command("m-a").await.unwrap().is_none());
}

#[tokio::test]
async fn machine_listing_shows_liveness() {
    let app = test_app().await;
    let user = app.bearer("alice", "user");
    app.post_as_machine(HEARTBEAT_PATH, KEY_B, "").await;

    let (status, body) = app.get("/api/machines", &[("authorization", &user)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert!(body[0].get("key_hash").is_none());

    let (_, body) = app.get("/api/machines?online=true", &[("authorization", &user)]).await;
    let online = body.as_array().unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["id"], "m-b");
    assert_eq!(online[0]["online"], true);
}
