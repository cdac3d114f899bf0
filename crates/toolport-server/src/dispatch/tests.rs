use toolport_core::db::unix_timestamp;
use toolport_core::protocol::{HeartbeatRequest, MachineCommand, RunOutcome, RunResult};

use super::lease::{LEASE_EXPIRED_MESSAGE, expire_stale_runs};
use super::{DispatchError, Dispatcher};
use crate::auth::claims::{ROLE_OPERATOR, ROLE_USER};
use crate::auth::{Claims, hash_secret};
use crate::storage::{FinishGuard, Machine, NewTool, PortalDatabase};

const CALLBACK: &str = "http://portal.test/api/runs/callback";

async fn setup() -> Dispatcher {
    let db = PortalDatabase::open_in_memory().await.unwrap();
    for (id, mode, tool_type) in [
        ("t-queue", "queue", "python_runner"),
        ("t-helper", "helper", "excel"),
        ("t-open", "open", "url"),
    ] {
        db.create_tool(&NewTool {
            id,
            name: id,
            tool_type,
            target: None,
            run_config: None,
            execution_mode: mode,
        })
        .await
        .unwrap();
    }
    db.create_machine("m-a", "runner-a", &hash_secret("key-a"))
        .await
        .unwrap();
    db.create_machine("m-b", "runner-b", &hash_secret("key-b"))
        .await
        .unwrap();
    Dispatcher::new(db, CALLBACK, 120)
}

fn user(id: &str, role: &str) -> Claims {
    Claims {
        jti: "j".into(),
        sub: id.into(),
        username: id.into(),
        role: role.into(),
        iat: 0,
        exp: i64::MAX,
    }
}

async fn machine(d: &Dispatcher, key: &str) -> Machine {
    d.authenticate_machine(Some(key)).await.unwrap()
}

fn ok_result() -> RunResult {
    RunResult {
        summary: Some("done".into()),
        ..RunResult::default()
    }
}

// === Registry ===

#[tokio::test]
async fn authenticate_rejects_missing_unknown_and_disabled() {
    let d = setup().await;
    assert!(matches!(
        d.authenticate_machine(None).await,
        Err(DispatchError::MissingMachineKey)
    ));
    assert!(matches!(
        d.authenticate_machine(Some("  ")).await,
        Err(DispatchError::MissingMachineKey)
    ));
    assert!(matches!(
        d.authenticate_machine(Some("nope")).await,
        Err(DispatchError::InvalidMachineKey)
    ));

    d.db().set_machine_enabled("m-a", false).await.unwrap();
    assert!(matches!(
        d.authenticate_machine(Some("key-a")).await,
        Err(DispatchError::MachineDisabled)
    ));
    assert_eq!(machine(&d, "key-b").await.id, "m-b");
}

// === Claim / report ===

#[tokio::test]
async fn end_to_end_claim_and_report() {
    let d = setup().await;
    let alice = user("alice", ROLE_USER);
    let run = d.create_run(&alice, "t-queue", None).await.unwrap();
    assert_eq!(run.status, "queued");

    let a = machine(&d, "key-a").await;
    let b = machine(&d, "key-b").await;

    let claim = d.claim(&a).await.unwrap().unwrap();
    assert_eq!(claim.run_id, run.id);
    assert_eq!(claim.callback_url, CALLBACK);
    assert_eq!(claim.tool.tool_type, "python_runner");
    assert_eq!(claim.run_token.len(), 64);
    assert!(d.claim(&b).await.unwrap().is_none());

    let err = d
        .report(&b, &run.id, RunOutcome::Success, &ok_result())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotOwner(_)));

    d.report(&a, &run.id, RunOutcome::Success, &ok_result())
        .await
        .unwrap();
    let done = d.get_run(&run.id).await.unwrap();
    assert_eq!(done.status, "success");
    assert!(done.finished_at.is_some());
    assert_eq!(done.started_at, done.claimed_at);

    let err = d
        .report(&a, &run.id, RunOutcome::Failed, &RunResult::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotRunning { .. }));
    let after = d.get_run(&run.id).await.unwrap();
    assert_eq!(after.status, "success");
    assert_eq!(after.finished_at, done.finished_at);
}

#[tokio::test]
async fn claim_rotates_the_run_token() {
    let d = setup().await;
    let run = d
        .create_run(&user("alice", ROLE_USER), "t-queue", None)
        .await
        .unwrap();
    let before = d.db().get_run(&run.id).await.unwrap().run_token_hash;

    let claim = d.claim(&machine(&d, "key-a").await).await.unwrap().unwrap();
    let after = d.db().get_run(&run.id).await.unwrap().run_token_hash;
    assert_ne!(before, after);
    assert_eq!(after, hash_secret(&claim.run_token));
}

#[tokio::test]
async fn report_on_unknown_run_is_not_found() {
    let d = setup().await;
    let a = machine(&d, "key-a").await;
    assert!(matches!(
        d.report(&a, "missing", RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn report_on_queued_run_is_refused_for_everyone() {
    let d = setup().await;
    let run = d
        .create_run(&user("alice", ROLE_USER), "t-queue", None)
        .await
        .unwrap();
    let a = machine(&d, "key-a").await;
    // No machine owns an unclaimed run.
    assert!(matches!(
        d.report(&a, &run.id, RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::NotOwner(_))
    ));
}

// === Callback ===

#[tokio::test]
async fn callback_is_token_gated_and_applies_once() {
    let d = setup().await;
    let run = d
        .create_run(&user("alice", ROLE_USER), "t-queue", None)
        .await
        .unwrap();
    let claim = d.claim(&machine(&d, "key-a").await).await.unwrap().unwrap();

    assert!(matches!(
        d.callback(&run.id, "wrong", RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::InvalidRunToken)
    ));

    d.callback(&run.id, &claim.run_token, RunOutcome::Failed, &RunResult::default())
        .await
        .unwrap();
    assert_eq!(d.get_run(&run.id).await.unwrap().status, "failed");

    assert!(matches!(
        d.callback(&run.id, &claim.run_token, RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::AlreadyCompleted(_))
    ));
    // A wrong token stays 401-class even on a terminal run.
    assert!(matches!(
        d.callback(&run.id, "wrong", RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::InvalidRunToken)
    ));
    assert_eq!(d.get_run(&run.id).await.unwrap().status, "failed");
}

#[tokio::test]
async fn callback_on_unknown_run_is_not_found() {
    let d = setup().await;
    assert!(matches!(
        d.callback("missing", "t", RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::RunNotFound(_))
    ));
}

// === Heartbeat ===

#[tokio::test]
async fn heartbeat_delivers_stop_once() {
    let d = setup().await;
    let op = user("op", ROLE_OPERATOR);
    d.set_machine_command(&op, "m-a", MachineCommand::Stop)
        .await
        .unwrap();

    let a = machine(&d, "key-a").await;
    let req = HeartbeatRequest {
        hostname: Some("HOST-A".into()),
        starting: false,
    };
    let first = d.heartbeat(&a, &req).await.unwrap();
    assert_eq!(first.command, Some(MachineCommand::Stop));
    assert_eq!(first.machine_name, "runner-a");

    let second = d.heartbeat(&a, &req).await.unwrap();
    assert!(second.command.is_none());

    let stored = d.db().get_machine("m-a").await.unwrap();
    assert!(stored.pending_command.is_none());
    assert_eq!(stored.hostname.as_deref(), Some("HOST-A"));
    assert!(stored.last_seen_at.is_some());
}

#[tokio::test]
async fn heartbeat_while_starting_discards_command() {
    let d = setup().await;
    d.set_machine_command(&user("op", ROLE_OPERATOR), "m-a", MachineCommand::Stop)
        .await
        .unwrap();

    let a = machine(&d, "key-a").await;
    let resp = d
        .heartbeat(
            &a,
            &HeartbeatRequest {
                hostname: None,
                starting: true,
            },
        )
        .await
        .unwrap();
    assert!(resp.command.is_none());
    assert!(d.db().get_pending_command("m-a").await.unwrap().is_none());
}

#[tokio::test]
async fn empty_hostname_keeps_previous() {
    let d = setup().await;
    let a = machine(&d, "key-a").await;
    let named = HeartbeatRequest {
        hostname: Some("HOST-A".into()),
        starting: true,
    };
    d.heartbeat(&a, &named).await.unwrap();
    let blank = HeartbeatRequest {
        hostname: Some(" ".into()),
        starting: false,
    };
    d.heartbeat(&a, &blank).await.unwrap();
    assert_eq!(
        d.db().get_machine("m-a").await.unwrap().hostname.as_deref(),
        Some("HOST-A")
    );
}

#[tokio::test]
async fn only_operators_command_machines() {
    let d = setup().await;
    assert!(matches!(
        d.set_machine_command(&user("alice", ROLE_USER), "m-a", MachineCommand::Stop)
            .await,
        Err(DispatchError::PermissionDenied(_))
    ));
    assert!(matches!(
        d.set_machine_command(&user("op", ROLE_OPERATOR), "m-x", MachineCommand::Stop)
            .await,
        Err(DispatchError::MachineNotFound(_))
    ));
}

// === Run actions ===

#[tokio::test]
async fn create_run_validates_tool_and_pinning() {
    let d = setup().await;
    let alice = user("alice", ROLE_USER);
    let op = user("op", ROLE_OPERATOR);

    assert!(matches!(
        d.create_run(&alice, "t-missing", None).await,
        Err(DispatchError::ToolNotFound(_))
    ));
    assert!(matches!(
        d.create_run(&alice, "t-open", None).await,
        Err(DispatchError::WrongExecutionMode { .. })
    ));
    assert!(matches!(
        d.create_run(&alice, "t-queue", Some("m-b")).await,
        Err(DispatchError::PermissionDenied(_))
    ));
    assert!(matches!(
        d.create_run(&op, "t-queue", Some("m-x")).await,
        Err(DispatchError::MachineNotFound(_))
    ));

    d.db().set_tool_archived("t-queue", true).await.unwrap();
    assert!(matches!(
        d.create_run(&alice, "t-queue", None).await,
        Err(DispatchError::ToolArchived(_))
    ));
}

#[tokio::test]
async fn pinned_run_goes_to_its_machine() {
    let d = setup().await;
    let run = d
        .create_run(&user("op", ROLE_OPERATOR), "t-queue", Some("m-b"))
        .await
        .unwrap();

    assert!(d.claim(&machine(&d, "key-a").await).await.unwrap().is_none());
    let claim = d.claim(&machine(&d, "key-b").await).await.unwrap().unwrap();
    assert_eq!(claim.run_id, run.id);
}

#[tokio::test]
async fn cancel_guard() {
    let d = setup().await;
    let alice = user("alice", ROLE_USER);
    let queued = d.create_run(&alice, "t-queue", None).await.unwrap();

    assert!(matches!(
        d.cancel_run(&user("bob", ROLE_USER), &queued.id).await,
        Err(DispatchError::PermissionDenied(_))
    ));
    d.cancel_run(&alice, &queued.id).await.unwrap();
    let canceled = d.get_run(&queued.id).await.unwrap();
    assert_eq!(canceled.status, "canceled");
    assert!(canceled.finished_at.is_some());

    assert!(matches!(
        d.cancel_run(&alice, &queued.id).await,
        Err(DispatchError::NotCancelable { .. })
    ));

    let running = d.create_run(&alice, "t-queue", None).await.unwrap();
    d.claim(&machine(&d, "key-a").await).await.unwrap().unwrap();
    assert!(matches!(
        d.cancel_run(&alice, &running.id).await,
        Err(DispatchError::NotCancelable { .. })
    ));
    assert_eq!(d.get_run(&running.id).await.unwrap().status, "running");
}

#[tokio::test]
async fn canceled_run_cannot_be_completed() {
    let d = setup().await;
    let alice = user("alice", ROLE_USER);
    let run = d.create_run(&alice, "t-queue", None).await.unwrap();
    d.cancel_run(&alice, &run.id).await.unwrap();
    let canceled = d.get_run(&run.id).await.unwrap();

    let a = machine(&d, "key-a").await;
    assert!(matches!(
        d.report(&a, &run.id, RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::NotOwner(_))
    ));
    assert!(matches!(
        d.callback(&run.id, "guessed", RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::InvalidRunToken)
    ));

    let later = canceled.finished_at.unwrap() + 10;
    for guard in [
        FinishGuard::TokenHash(&canceled.run_token_hash),
        FinishGuard::Machine(&a.id),
    ] {
        let applied = d
            .db()
            .finish_run(&run.id, guard, RunOutcome::Success, &ok_result(), later)
            .await
            .unwrap();
        assert!(!applied);
    }

    let after = d.get_run(&run.id).await.unwrap();
    assert_eq!(after.status, "canceled");
    assert_eq!(after.finished_at, canceled.finished_at);
    assert!(after.summary.is_none());
}

#[tokio::test]
async fn helper_launch_is_recorded_as_success() {
    let d = setup().await;
    let alice = user("alice", ROLE_USER);
    let run = d.record_helper_launch(&alice, "t-helper").await.unwrap();
    assert_eq!(run.status, "success");
    assert_eq!(run.summary.as_deref(), Some("Opened in Excel"));
    assert_eq!(run.started_at, run.finished_at);

    assert!(matches!(
        d.record_helper_launch(&alice, "t-queue").await,
        Err(DispatchError::WrongExecutionMode { .. })
    ));
    // Helper records never enter the queue.
    assert!(d.claim(&machine(&d, "key-a").await).await.unwrap().is_none());
}

#[tokio::test]
async fn machine_listing_derives_online() {
    let d = setup().await;
    let a = machine(&d, "key-a").await;
    d.heartbeat(&a, &HeartbeatRequest::default()).await.unwrap();

    let all = d.list_machines(false).await.unwrap();
    assert_eq!(all.len(), 2);
    let online = d.list_machines(true).await.unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].machine.id, "m-a");
}

// === Lease ===

#[tokio::test]
async fn expired_lease_fails_run_and_blocks_late_report() {
    let d = setup().await;
    let run = d
        .create_run(&user("alice", ROLE_USER), "t-queue", None)
        .await
        .unwrap();
    let a = machine(&d, "key-a").await;
    d.claim(&a).await.unwrap().unwrap();

    let later = unix_timestamp() + 100;
    assert!(expire_stale_runs(d.db(), 0, later).await.unwrap().is_empty());
    assert!(expire_stale_runs(d.db(), 3600, later).await.unwrap().is_empty());

    let expired = expire_stale_runs(d.db(), 60, later).await.unwrap();
    assert_eq!(expired, vec![run.id.clone()]);
    let failed = d.get_run(&run.id).await.unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.error_message.as_deref(), Some(LEASE_EXPIRED_MESSAGE));

    assert!(matches!(
        d.report(&a, &run.id, RunOutcome::Success, &ok_result()).await,
        Err(DispatchError::NotRunning { .. })
    ));
}
