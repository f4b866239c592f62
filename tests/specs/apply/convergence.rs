// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end reconciliation specs: target writes converge, commits track
//! fully-applied releases, local mode gates the target endpoint.

use crate::support::{one_service_target, Spec, APP, IMG};

#[tokio::test]
async fn target_writes_converge_and_record_the_commit() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "release-1")).await;

    assert_eq!(spec.runtime.container_state("main").as_deref(), Some("running"));
    assert_eq!(spec.target.get_commit_for_app(APP).as_deref(), Some("release-1"));

    // A second release with a config change recreates the service and
    // moves the commit only once fully applied.
    let mut next = one_service_target(APP, "release-2");
    next["local"]["apps"][APP.to_string()]["services"]["main"]["environment"] =
        serde_json::json!({ "PORT": "8080" });
    spec.converge_target(next).await;

    assert_eq!(spec.runtime.container_state("main").as_deref(), Some("running"));
    assert_eq!(spec.target.get_commit_for_app(APP).as_deref(), Some("release-2"));
}

#[tokio::test]
async fn interleaved_target_writes_still_converge() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "release-1")).await;

    // Fire a burst of different targets without waiting in between; the
    // loop coalesces and the final target wins.
    for n in 2..5 {
        let mut raw = one_service_target(APP, &format!("release-{n}"));
        raw["local"]["apps"][APP.to_string()]["services"]["main"]["environment"] =
            serde_json::json!({ "RELEASE": n.to_string() });
        spec.target.set_target_raw(&raw).await.unwrap();
    }

    spec.wait_until("final release applied", || {
        spec.target.get_commit_for_app(APP).as_deref() == Some("release-4")
    })
    .await;
    assert_eq!(spec.runtime.container_count(), 1);
}

#[tokio::test]
async fn local_target_state_roundtrip_in_local_mode() {
    let spec = Spec::start().await;
    spec.config.update(|doc| doc.local_mode = true).unwrap();

    let target = one_service_target(APP, "local-1");
    let (status, _) = spec.post("/v2/local/target-state", Some(target.clone()), None).await;
    assert_eq!(status, 200);

    spec.wait_until("local target applied", || {
        spec.runtime.container_state("main").as_deref() == Some("running")
    })
    .await;

    let (status, body) = spec.get("/v2/local/target-state", None).await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(
        body["state"]["local"]["apps"][APP.to_string()]["commit"],
        "local-1"
    );
}

#[tokio::test]
async fn local_target_state_rejected_outside_local_mode() {
    let spec = Spec::start().await;
    let key = spec.cloud_key();

    let (status, body) = spec
        .post("/v2/local/target-state", Some(one_service_target(APP, "x")), Some(&key))
        .await;
    assert_eq!(status, 400);
    assert!(body.contains("local mode"));
    // Nothing was persisted
    assert!(spec.target.get_target(false).await.local.apps.is_empty());
}

#[tokio::test]
async fn malformed_local_target_is_rejected_with_a_message() {
    let spec = Spec::start().await;
    spec.config.update(|doc| doc.local_mode = true).unwrap();

    let (status, body) = spec
        .post("/v2/local/target-state", Some(serde_json::json!({ "apps": {} })), None)
        .await;
    assert_eq!(status, 400);
    assert!(body.contains("local"), "message should name the missing object: {body}");
}

#[tokio::test]
async fn removed_app_is_torn_down() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "release-1")).await;
    assert_eq!(spec.runtime.container_count(), 1);

    // Target drops the app entirely
    let empty = serde_json::json!({
        "local": { "name": "spec-device", "config": {}, "apps": {} },
        "dependent": {}
    });
    spec.converge_target(empty).await;
    assert_eq!(spec.runtime.container_count(), 0);
}

#[tokio::test]
async fn image_fetch_happens_before_start() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "release-1")).await;

    let calls = spec.runtime.calls();
    let pull = calls
        .iter()
        .position(|c| matches!(c, steward_daemon::adapters::RuntimeCall::Pull(name) if name == IMG))
        .expect("image must be pulled");
    let start = calls
        .iter()
        .position(|c| {
            matches!(c, steward_daemon::adapters::RuntimeCall::Start(name) if name == "main")
        })
        .expect("service must start");
    assert!(pull < start, "fetch must precede start: {calls:?}");
}
