// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API key lifecycle specs

use crate::support::{one_service_target, Spec, APP};

#[tokio::test]
async fn regenerate_revokes_the_old_key_on_the_very_next_request() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    let old = spec.cloud_key();

    let (status, new_key) = spec.post("/v2/regenerate-api-key", None, Some(&old)).await;
    assert_eq!(status, 200);
    assert!(!new_key.is_empty());
    assert_ne!(new_key, old);

    // Old token: rejected immediately
    let (status, _) = spec.get("/v2/device/vpn", Some(&old)).await;
    assert_eq!(status, 401);
    // New token: accepted
    let (status, _) = spec.get("/v2/device/vpn", Some(&new_key)).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn regenerated_cloud_key_is_reported_on_the_state_channel() {
    let spec = Spec::start().await;
    let old = spec.cloud_key();
    let mut changes = spec.events.subscribe_current_state_change();

    let (status, new_key) = spec.post("/v2/regenerate-api-key", None, Some(&old)).await;
    assert_eq!(status, 200);

    let fields = changes.try_recv().unwrap();
    assert_eq!(fields["api_key"], serde_json::json!(new_key));
}

#[tokio::test]
async fn scoped_key_regeneration_keeps_the_narrow_scope() {
    let spec = Spec::start().await;
    spec.converge_target(one_service_target(APP, "abc")).await;
    let old = spec.scoped_key(APP);

    let (status, new_key) = spec.post("/v2/regenerate-api-key", None, Some(&old)).await;
    assert_eq!(status, 200);

    // Still scoped to its own app only
    let (status, _) = spec
        .post(
            &format!("/v2/applications/{APP}/start-service"),
            Some(serde_json::json!({ "serviceName": "main" })),
            Some(&new_key),
        )
        .await;
    assert_eq!(status, 200);
    let (status, _) = spec
        .post(
            "/v2/applications/9999/start-service",
            Some(serde_json::json!({ "serviceName": "main" })),
            Some(&new_key),
        )
        .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn apikey_query_parameter_authenticates() {
    let spec = Spec::start().await;
    let key = spec.cloud_key();
    let (status, _) = spec.get(&format!("/v2/device/vpn?apikey={key}"), None).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn local_mode_bypasses_auth() {
    let spec = Spec::start().await;
    spec.config.update(|doc| doc.local_mode = true).unwrap();
    let (status, _) = spec.get("/v2/device/vpn", None).await;
    assert_eq!(status, 200);
}
