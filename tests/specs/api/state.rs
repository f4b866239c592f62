// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State, status and health endpoint specs

use crate::support::{main_service, one_service_target, Spec, APP, OTHER_APP};

/// Target with two apps, one `main` service each.
fn two_app_target() -> serde_json::Value {
    let mut raw = one_service_target(APP, "abc");
    let other = one_service_target(OTHER_APP, "fff");
    let apps = raw["local"]["apps"].as_object_mut().unwrap();
    apps.insert(
        OTHER_APP.to_string(),
        other["local"]["apps"][OTHER_APP.to_string()].clone(),
    );
    raw
}

#[tokio::test]
async fn state_status_with_scoped_key_reports_only_that_app() {
    let spec = Spec::start().await;
    spec.converge_target(two_app_target()).await;
    assert_eq!(spec.runtime.container_count(), 2);
    let key = spec.scoped_key(APP);

    let (status, body) = spec.get("/v2/state/status", Some(&key)).await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();

    assert_eq!(body["status"], "success");
    assert_eq!(body["appState"], "applied");
    let containers = body["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 1, "exactly one app in the view: {containers:?}");
    assert_eq!(containers[0]["appId"], APP);
    assert_eq!(body["release"], "abc");
}

#[tokio::test]
async fn state_status_without_scope_narrowing_picks_the_lowest_app_id() {
    let spec = Spec::start().await;
    spec.converge_target(two_app_target()).await;
    let key = spec.cloud_key();

    let (status, body) = spec.get("/v2/state/status", Some(&key)).await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    let containers = body["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["appId"], OTHER_APP.min(APP));
}

#[tokio::test]
async fn app_state_reports_commit_and_service_status() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    let key = spec.scoped_key(APP);

    let (status, body) = spec.get(&format!("/v2/applications/{APP}/state"), Some(&key)).await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["commit"], "abc");
    assert_eq!(body["dependent"], serde_json::json!({}));
    assert_eq!(
        body["local"][APP.to_string()]["services"]["main"]["status"],
        "Running"
    );
}

#[tokio::test]
async fn app_state_boundaries() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    let key = spec.cloud_key();

    // Non-numeric app id
    let (status, _) = spec.get("/v2/applications/123invalid/state", Some(&key)).await;
    assert_eq!(status, 400);

    // Unknown app
    let (status, _) = spec.get("/v2/applications/9000/state", Some(&key)).await;
    assert_eq!(status, 409);

    // Out of scope
    let foreign = spec.scoped_key(OTHER_APP);
    let (status, _) = spec.get(&format!("/v2/applications/{APP}/state"), Some(&foreign)).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn healthy_reports_ok_while_probes_pass() {
    let spec = Spec::start().await;
    let (status, body) = spec.get("/v2/healthy", None).await;
    assert_eq!(status, 200);
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn device_vpn_reports_disconnected_by_default() {
    let spec = Spec::start().await;
    let key = spec.cloud_key();
    let (status, body) = spec.get("/v2/device/vpn", Some(&key)).await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["vpn"]["enabled"], false);
    assert_eq!(body["vpn"]["connected"], false);
}

#[tokio::test]
async fn container_id_lookup_by_service_and_in_bulk() {
    let spec = Spec::start().await;
    spec.runtime.seed_image(crate::support::IMG);
    let id = spec.runtime.seed_service(&main_service(APP), true);
    let key = spec.cloud_key();

    let (status, body) = spec.get("/v2/containerId?serviceName=main", Some(&key)).await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["containerId"], serde_json::json!(id));

    let (status, body) = spec.get("/v2/containerId", Some(&key)).await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["services"]["main"], serde_json::json!(id));

    let (status, _) = spec.get("/v2/containerId?serviceName=ghost", Some(&key)).await;
    assert_eq!(status, 503);
}
