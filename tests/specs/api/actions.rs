// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service action specs
//!
//! Start, stop and restart through the control API, with and without
//! advisory locks held by a co-resident workload. Every spec first lets
//! the apply loop converge on the target, so the only runtime calls under
//! test are the ones the handler dispatches.

use crate::support::{one_service_target, Spec, APP};
use steward_daemon::adapters::RuntimeCall;

#[tokio::test]
async fn start_known_service_succeeds_and_bypasses_locks() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    spec.runtime.clear_calls();
    // A workload blocks updates; starting is not an update
    spec.hold_lock(APP, "main");
    let key = spec.scoped_key(APP);

    let (status, body) = spec
        .post(
            &format!("/v2/applications/{APP}/start-service"),
            Some(serde_json::json!({ "serviceName": "main" })),
            Some(&key),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body, "OK");
    // The executor ran exactly one start step
    assert_eq!(spec.runtime.calls(), [RuntimeCall::Start("main".into())]);
    // The workload's lock file was never touched
    assert!(spec.lock_path(APP, "main").exists());
}

#[tokio::test]
async fn start_unknown_service_is_404_without_invoking_the_executor() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    spec.runtime.clear_calls();
    let key = spec.scoped_key(APP);

    let (status, _) = spec
        .post(
            &format!("/v2/applications/{APP}/start-service"),
            Some(serde_json::json!({ "serviceName": "unknown" })),
            Some(&key),
        )
        .await;

    assert_eq!(status, 404);
    assert!(spec.runtime.calls().is_empty(), "no step may reach the runtime");
}

#[tokio::test]
async fn restart_under_lock_without_force_is_423() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    spec.hold_lock(APP, "main");
    let key = spec.scoped_key(APP);
    let mut step_errors = spec.events.subscribe_step_error();

    let (status, _) = spec
        .post(
            &format!("/v2/applications/{APP}/restart-service"),
            Some(serde_json::json!({ "serviceName": "main" })),
            Some(&key),
        )
        .await;

    assert_eq!(status, 423);
    // The error surfaced from inside the executor
    let failure = step_errors.try_recv().unwrap();
    assert_eq!(failure.report.action, "restart");
    assert!(failure.updates_locked);
    assert_eq!(spec.runtime.container_state("main").as_deref(), Some("running"));
}

#[tokio::test]
async fn restart_under_lock_with_force_succeeds() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    spec.hold_lock(APP, "main");
    spec.runtime.clear_calls();
    let key = spec.scoped_key(APP);

    let (status, body) = spec
        .post(
            &format!("/v2/applications/{APP}/restart-service"),
            Some(serde_json::json!({ "serviceName": "main", "force": true })),
            Some(&key),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body, "OK");
    let calls = spec.runtime.calls();
    assert!(calls.contains(&RuntimeCall::Stop("main".into())), "calls: {calls:?}");
    assert!(calls.contains(&RuntimeCall::Start("main".into())), "calls: {calls:?}");
}

#[tokio::test]
async fn stop_service_marks_volatile_intent() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    let key = spec.scoped_key(APP);

    let (status, _) = spec
        .post(
            &format!("/v2/applications/{APP}/stop-service"),
            Some(serde_json::json!({ "serviceName": "main" })),
            Some(&key),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(spec.runtime.container_state("main").as_deref(), Some("exited"));
    // The planner now sees not-running as the intent for this service
    assert_eq!(spec.target.volatile().running(APP, "main"), Some(false));
}

#[tokio::test]
async fn scoped_key_cannot_touch_other_apps() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    let foreign_key = spec.scoped_key(9_999);

    let (status, _) = spec
        .post(
            &format!("/v2/applications/{APP}/start-service"),
            Some(serde_json::json!({ "serviceName": "main" })),
            Some(&foreign_key),
        )
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn missing_key_is_401() {
    let spec = Spec::start().await;
    let (status, _) = spec
        .post(
            &format!("/v2/applications/{APP}/start-service"),
            Some(serde_json::json!({ "serviceName": "main" })),
            None,
        )
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn purge_removes_and_rebuilds_the_app() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    assert_eq!(spec.runtime.container_count(), 1);
    let key = spec.scoped_key(APP);

    let (status, body) = spec
        .post(
            &format!("/v2/applications/{APP}/purge"),
            Some(serde_json::json!({ "force": true })),
            Some(&key),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");

    // The follow-up apply recreates the service from target state
    spec.wait_until("service recreated after purge", || {
        spec.runtime.container_state("main").as_deref() == Some("running")
    })
    .await;
}

#[tokio::test]
async fn invalid_app_id_is_400() {
    let spec = Spec::start().await;
    let key = spec.cloud_key();
    let (status, _) = spec
        .post(
            "/v2/applications/123invalid/start-service",
            Some(serde_json::json!({ "serviceName": "main" })),
            Some(&key),
        )
        .await;
    assert_eq!(status, 400);
}
