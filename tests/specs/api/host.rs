// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reboot, shutdown and blink specs

use crate::support::{one_service_target, Spec, APP};

#[tokio::test]
async fn reboot_without_force_under_lock_is_423_and_never_reaches_the_host() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    spec.hold_lock(APP, "main");
    let key = spec.cloud_key();

    let (status, _) = spec.post("/v2/reboot", None, Some(&key)).await;

    assert_eq!(status, 423);
    assert_eq!(spec.host.reboots(), 0, "host reboot must not be called");
    assert_eq!(spec.runtime.container_state("main").as_deref(), Some("running"));
}

#[tokio::test]
async fn reboot_with_force_stops_services_then_calls_the_host_once() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    spec.hold_lock(APP, "main");
    let key = spec.cloud_key();

    let (status, body) =
        spec.post("/v2/reboot", Some(serde_json::json!({ "force": true })), Some(&key)).await;

    assert_eq!(status, 202);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, serde_json::json!({ "Data": "OK", "Error": null }));
    // stopAll ran before the primitive
    assert_eq!(spec.runtime.container_state("main").as_deref(), Some("exited"));
    assert_eq!(spec.host.reboots(), 1);
    assert!(spec.apply.shutting_down());
}

#[tokio::test]
async fn shutdown_mirrors_reboot() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    let key = spec.cloud_key();
    let mut shutdown_events = spec.events.subscribe_shutdown();

    let (status, _) = spec.post("/v2/shutdown", None, Some(&key)).await;

    assert_eq!(status, 202);
    assert_eq!(spec.host.shutdowns(), 1);
    shutdown_events.try_recv().unwrap();
}

#[tokio::test(start_paused = true)]
async fn blink_starts_the_pattern_and_stops_it_after_fifteen_seconds() {
    let spec = Spec::start().await;
    let key = spec.cloud_key();

    let (status, body) = spec.post("/v2/blink", None, Some(&key)).await;
    assert_eq!(status, 200);
    assert_eq!(body, "");

    spec.wait_until("blink pattern started", || spec.host.blink_starts() == 1).await;
    assert_eq!(spec.host.blink_stops(), 0);

    tokio::time::sleep(std::time::Duration::from_secs(16)).await;
    assert_eq!(spec.host.blink_stops(), 1);
}

#[tokio::test]
async fn blink_requires_a_key() {
    let spec = Spec::start().await;
    spec.cloud_key();
    let (status, _) = spec.post("/v2/blink", None, None).await;
    assert_eq!(status, 401);
}
