// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for service config comparison and the volatile overlay

use super::*;

fn service(name: &str, image: &str) -> Service {
    Service {
        app_id: 1,
        service_name: name.to_string(),
        service_id: Some(10),
        release_id: Some(100),
        image: image.to_string(),
        image_id: Some(7),
        container_id: None,
        status: ServiceStatus::Running,
        environment: BTreeMap::new(),
        labels: BTreeMap::new(),
        running: true,
        update_strategy: UpdateStrategy::Recreate,
        composition: BTreeMap::new(),
        created_at: None,
    }
}

#[test]
fn same_config_ignores_release_bookkeeping() {
    let a = service("main", "img:1");
    let mut b = a.clone();
    b.release_id = Some(101);
    b.image_id = Some(8);
    assert!(a.same_config(&b));
    assert!(a.only_metadata_differs(&b));
}

#[test]
fn same_config_detects_environment_change() {
    let a = service("main", "img:1");
    let mut b = a.clone();
    b.environment.insert("PORT".into(), "8080".into());
    assert!(!a.same_config(&b));
    assert!(!a.only_metadata_differs(&b));
}

#[test]
fn same_config_ignores_steward_labels() {
    let a = service("main", "img:1");
    let mut b = a.clone();
    b.labels.insert("io.steward.release-id".into(), "101".into());
    assert!(a.same_config(&b));
}

#[test]
fn same_config_detects_user_label_change() {
    let a = service("main", "img:1");
    let mut b = a.clone();
    b.labels.insert("traefik.enable".into(), "true".into());
    assert!(!a.same_config(&b));
}

#[test]
fn equal_services_are_not_metadata_updates() {
    let a = service("main", "img:1");
    assert!(!a.only_metadata_differs(&a.clone()));
}

#[test]
fn container_name_encodes_bookkeeping() {
    let s = service("main", "img:1");
    assert_eq!(s.container_name(), "main_7_100");
}

#[yare::parameterized(
    running  = { ServiceStatus::Running, true },
    starting = { ServiceStatus::Starting, true },
    stopped  = { ServiceStatus::Stopped, false },
    exited   = { ServiceStatus::Exited, false },
    dead     = { ServiceStatus::Dead, false },
)]
fn is_running(status: ServiceStatus, expected: bool) {
    let mut s = service("main", "img:1");
    s.status = status;
    assert_eq!(s.is_running(), expected);
}

#[test]
fn exited_status_serializes_lowercase() {
    let json = serde_json::to_string(&ServiceStatus::Exited).unwrap();
    assert_eq!(json, "\"exited\"");
    assert_eq!(ServiceStatus::Exited.to_string(), "exited");
}

#[test]
fn overlay_set_and_clear_per_app() {
    let mut overlay = VolatileOverlay::default();
    overlay.set_running(1, "main", false);
    overlay.set_running(2, "side", true);

    assert_eq!(overlay.running(1, "main"), Some(false));
    assert_eq!(overlay.running(2, "side"), Some(true));
    assert_eq!(overlay.running(1, "other"), None);

    overlay.clear_app(1);
    assert_eq!(overlay.running(1, "main"), None);
    assert_eq!(overlay.running(2, "side"), Some(true));
}

#[yare::parameterized(
    hand_over = { "hand-over", UpdateStrategy::HandOver },
    handover  = { "handover", UpdateStrategy::HandOver },
    other     = { "download-then-kill", UpdateStrategy::Recreate },
)]
fn strategy_from_label(value: &str, expected: UpdateStrategy) {
    assert_eq!(UpdateStrategy::from_label(value), expected);
}
