// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use vea_core::AppState;
use vea_store::AppFilter;

use crate::sandbox::{DriverCall, SandboxError};

use super::test_helpers::{deploy_spec, fixture, fixture_with};
use super::*;

fn token() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn full_lifecycle_install_pause_resume_stop_remove() {
    let fx = fixture();
    let (outcome, _) = fx.core.deploy(deploy_spec("test-app"), None, &token()).await.unwrap();
    assert_eq!(outcome.status, OpStatus::Success);
    assert_eq!(outcome.state, AppState::Running);
    assert_eq!(outcome.app_id, "VEA-test-app");
    let exec = outcome.execution_id.clone().unwrap();

    // Pause using the prefixed form.
    let paused = fx.core.pause("VEA-test-app").await.unwrap();
    assert_eq!(paused.state, AppState::Paused);

    // Resume using the unprefixed form.
    let resumed = fx.core.resume("test-app").await.unwrap();
    assert_eq!(resumed.state, AppState::Running);
    assert_eq!(resumed.execution_id.as_ref().unwrap(), &exec);

    let stopped = fx.core.stop("test-app", None).await.unwrap();
    assert_eq!(stopped.status, OpStatus::Success);
    assert_eq!(stopped.state, AppState::Stopped);

    let removed = fx.core.remove("test-app").await.unwrap();
    assert_eq!(removed.state, AppState::Removed);
    assert!(fx.core.list(AppFilter::default()).is_empty());
}

#[tokio::test]
async fn start_twice_is_already_running_with_same_execution() {
    let fx = fixture();
    let (first, _) = fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    let first_exec = first.execution_id.unwrap();

    let second = fx.core.start("cam", &token()).await.unwrap();
    assert_eq!(second.status, OpStatus::AlreadyRunning);
    assert_eq!(second.execution_id.unwrap(), first_exec);

    // No second sandbox was created.
    let creates =
        fx.driver.calls().iter().filter(|c| matches!(c, DriverCall::Create(_))).count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn stop_twice_is_already_stopped() {
    let fx = fixture();
    fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    fx.core.stop("cam", None).await.unwrap();

    let again = fx.core.stop("cam", None).await.unwrap();
    assert_eq!(again.status, OpStatus::AlreadyStopped);
    assert_eq!(again.state, AppState::Stopped);
}

#[tokio::test]
async fn restart_cycle_mints_fresh_execution_ids() {
    let fx = fixture();
    let (first, _) = fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    fx.core.stop("cam", None).await.unwrap();
    let second = fx.core.start("cam", &token()).await.unwrap();

    assert_ne!(first.execution_id.unwrap(), second.execution_id.unwrap());
    // One record throughout.
    assert_eq!(fx.core.list(AppFilter::default()).len(), 1);
}

#[tokio::test]
async fn pause_outside_running_is_invalid_transition() {
    let fx = fixture();
    let spec = DeploySpec { auto_start: false, ..deploy_spec("cam") };
    fx.core.deploy(spec, None, &token()).await.unwrap();

    match fx.core.pause("cam").await {
        Err(LifecycleError::InvalidTransition { from, action }) => {
            assert_eq!(from, AppState::Installed);
            assert_eq!(action, "pause");
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_requires_paused() {
    let fx = fixture();
    fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    assert!(matches!(
        fx.core.resume("cam").await,
        Err(LifecycleError::InvalidTransition { from: AppState::Running, .. })
    ));
}

#[tokio::test]
async fn admission_limit_denies_the_next_start() {
    let fx = fixture_with(|c| c.max_live_apps = 2);
    fx.core.deploy(deploy_spec("one"), None, &token()).await.unwrap();
    fx.core.deploy(deploy_spec("two"), None, &token()).await.unwrap();

    let spec = DeploySpec { auto_start: false, ..deploy_spec("three") };
    fx.core.deploy(spec, None, &token()).await.unwrap();

    match fx.core.start("three", &token()).await {
        Err(LifecycleError::ResourceDenied { limit }) => assert_eq!(limit, 2),
        other => panic!("expected resource denied, got {other:?}"),
    }
    // State unchanged: still installed, startable once a slot frees up.
    assert_eq!(fx.core.get_status("three").unwrap().state, AppState::Installed);

    fx.core.stop("one", None).await.unwrap();
    assert!(fx.core.start("three", &token()).await.is_ok());
}

#[tokio::test]
async fn unknown_app_is_not_found_with_caller_spelling() {
    let fx = fixture();
    match fx.core.start("nope", &token()).await {
        Err(e @ LifecycleError::NotFound(_)) => {
            assert_eq!(e.to_string(), "Application not found: nope");
        }
        other => panic!("expected not found, got {other:?}"),
    }
}

#[tokio::test]
async fn execution_id_resolves_to_its_app() {
    let fx = fixture();
    let (outcome, _) = fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    let exec = outcome.execution_id.unwrap();

    let status = fx.core.get_status(exec.as_str()).unwrap();
    assert_eq!(status.app_id, "VEA-cam");
}

#[tokio::test]
async fn create_failure_marks_error_and_keeps_the_record() {
    let fx = fixture();
    let spec = DeploySpec { auto_start: false, ..deploy_spec("cam") };
    fx.core.deploy(spec, None, &token()).await.unwrap();

    fx.driver.fail_next("create", SandboxError::ArtifactUnusable("bad artifact".into()));
    let err = fx.core.start("cam", &token()).await.unwrap_err();
    assert_eq!(err.kind(), vea_core::ErrorKind::DriverError);
    assert!(!err.suggestions().is_empty());

    let status = fx.core.get_status("cam").unwrap();
    assert_eq!(status.state, AppState::Error);

    // Error clears on the next successful start.
    let outcome = fx.core.start("cam", &token()).await.unwrap();
    assert_eq!(outcome.state, AppState::Running);
}

#[tokio::test]
async fn stop_retries_three_times_then_gives_up_as_error() {
    let fx = fixture();
    fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();

    for _ in 0..3 {
        fx.driver.fail_next("stop", SandboxError::Unavailable("engine flake".into()));
    }
    let err = fx.core.stop("cam", None).await.unwrap_err();
    assert_eq!(err.kind(), vea_core::ErrorKind::DriverError);

    let stops = fx.driver.calls().iter().filter(|c| matches!(c, DriverCall::Stop(_))).count();
    assert_eq!(stops, 3);
    assert_eq!(fx.core.get_status("cam").unwrap().state, AppState::Error);
}

#[tokio::test]
async fn broker_failure_on_start_is_a_warning_not_an_error() {
    let fx = fixture();
    fx.gateway.fail_next_open();

    let (outcome, _) = fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    assert_eq!(outcome.status, OpStatus::Success);
    assert_eq!(outcome.state, AppState::Running);
    assert!(outcome.warnings.iter().any(|w| w.contains("signal session")));
}

#[tokio::test]
async fn remove_stops_first_and_reaps() {
    let fx = fixture();
    fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();

    fx.core.remove("cam").await.unwrap();
    let calls = fx.driver.calls();
    assert!(calls.iter().any(|c| matches!(c, DriverCall::Stop(_))));
    assert!(calls.iter().any(|c| matches!(c, DriverCall::Reap(_))));
    assert!(fx.driver.handles().is_empty());
    assert!(fx.gateway.closed.lock().contains(&"VEA-cam".to_string()));
    assert!(matches!(fx.core.get_status("cam"), Err(LifecycleError::NotFound(_))));
}

#[tokio::test]
async fn cancelled_start_rolls_back_the_fresh_sandbox() {
    let fx = fixture();
    let spec = DeploySpec { auto_start: false, ..deploy_spec("cam") };
    fx.core.deploy(spec, None, &token()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    match fx.core.start("cam", &cancel).await {
        Err(LifecycleError::DeadlineExceeded) => {}
        other => panic!("expected deadline exceeded, got {other:?}"),
    }

    // No duplicate sandbox left behind; the app can start again.
    assert!(fx.driver.handles().is_empty());
    assert_eq!(fx.core.get_status("cam").unwrap().state, AppState::Stopped);
    let outcome = fx.core.start("cam", &token()).await.unwrap();
    assert_eq!(outcome.state, AppState::Running);
}

#[tokio::test]
async fn live_handle_count_per_app_is_at_most_one() {
    let fx = fixture();
    fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    fx.core.stop("cam", None).await.unwrap();
    fx.core.start("cam", &token()).await.unwrap();
    assert_eq!(fx.core.live_count(), 1);
}

#[tokio::test]
async fn status_reflects_exit_code_after_observed_crash() {
    let fx = fixture();
    fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();
    let handle = fx.driver.handles().pop().unwrap();
    fx.driver.set_exited(&handle, 137);

    fx.core.reconcile_once().await;

    let status = fx.core.get_status("cam").unwrap();
    assert_eq!(status.state, AppState::Error);
    assert_eq!(status.exit_code, Some(137));
}

#[tokio::test]
async fn rapid_alternating_pause_resume_never_violates_the_machine() {
    let fx = fixture();
    fx.core.deploy(deploy_spec("cam"), None, &token()).await.unwrap();

    // 5 pauses and 5 resumes race on one app; the per-app lane
    // serializes them, so every op sees a consistent state and either
    // succeeds or reports invalid_transition. The final state is
    // whichever op the lane admitted last.
    let core = &fx.core;
    let mut outcomes = Vec::new();
    for _ in 0..5 {
        let (p, r) = tokio::join!(core.pause("cam"), core.resume("cam"));
        outcomes.push(p);
        outcomes.push(r);
    }
    for outcome in outcomes {
        match outcome {
            Ok(ok) => assert!(matches!(ok.state, AppState::Paused | AppState::Running)),
            Err(LifecycleError::InvalidTransition { .. }) => {}
            Err(other) => panic!("unexpected failure: {other:?}"),
        }
    }
    let final_state = fx.core.get_status("cam").unwrap().state;
    assert!(matches!(final_state, AppState::Paused | AppState::Running));
}
