// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only state and health endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;
use steward_core::{App, ImageStatus};
use steward_storage::Scope;

use super::{error_response, parse_app_id, require_scope, ApiCtx};

pub(crate) async fn healthy(State(ctx): State<Arc<ApiCtx>>) -> Response {
    if ctx.apply.healthcheck() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Unhealthy").into_response()
    }
}

pub(crate) async fn device_vpn(State(ctx): State<Arc<ApiCtx>>) -> Response {
    let vpn = *ctx.vpn.lock();
    Json(json!({
        "status": "success",
        "vpn": { "enabled": vpn.enabled, "connected": vpn.connected },
    }))
    .into_response()
}

/// Single-app view of the release and service states.
pub(crate) async fn app_state(
    State(ctx): State<Arc<ApiCtx>>,
    Path(app_id): Path<String>,
    Extension(scope): Extension<Scope>,
) -> Response {
    let app_id = match parse_app_id(&app_id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = require_scope(&scope, app_id) {
        return e.into_response();
    }

    let target = ctx.target.get_target_app(app_id).map(|a| a.instantiate(app_id));
    let current = match ctx.manager.get_current_apps().await {
        Ok(apps) => apps,
        Err(e) => return error_response(&e).into_response(),
    };
    let cur_app = current.iter().find(|a| a.app_id == app_id);
    if target.is_none() && cur_app.is_none() {
        return error_response(&steward_core::SupervisorError::AppNotFound(app_id))
            .into_response();
    }

    let commit = ctx.target.get_commit_for_app(app_id);
    let downloads = ctx.manager.downloads();
    let mut services = serde_json::Map::new();
    let names: Vec<String> = target
        .iter()
        .flat_map(|a| a.services.iter())
        .chain(cur_app.iter().flat_map(|a| a.services.iter()))
        .map(|s| s.service_name.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    for name in names {
        let cur = cur_app.and_then(|a| a.service(&name));
        let tgt = target.as_ref().and_then(|a| a.service(&name));
        let download = tgt
            .and_then(|t| t.image_id)
            .and_then(|id| downloads.iter().find(|d| d.image_id == id).cloned())
            .filter(|d| d.status == ImageStatus::Downloading);
        let status = match (&download, cur) {
            (Some(_), _) => "Downloading".to_string(),
            (None, Some(cur)) => cur.status.to_string(),
            (None, None) => "Installing".to_string(),
        };
        services.insert(
            name,
            json!({
                "status": status,
                "releaseId": tgt.or(cur).and_then(|s| s.release_id),
                "downloadProgress": download.and_then(|d| d.download_progress),
            }),
        );
    }

    Json(json!({
        "commit": commit,
        "local": { app_id.to_string(): { "services": services } },
        "dependent": {},
    }))
    .into_response()
}

/// Overall status: one app's containers, images and release.
///
/// A scoped key narrows the view to its app; otherwise the lowest app id is
/// reported.
pub(crate) async fn state_status(
    State(ctx): State<Arc<ApiCtx>>,
    Extension(scope): Extension<Scope>,
) -> Response {
    let current = match ctx.manager.get_current_apps().await {
        Ok(apps) => apps,
        Err(e) => return error_response(&e).into_response(),
    };
    let target_apps = ctx.target.get_target(false).await.instantiate();

    let selected = scope.single_app().or_else(|| {
        current
            .iter()
            .map(|a| a.app_id)
            .chain(target_apps.iter().map(|a| a.app_id))
            .min()
    });
    let Some(app_id) = selected.filter(|id| scope.is_scoped(*id)) else {
        return Json(json!({
            "status": "success",
            "appState": "applied",
            "overallDownloadProgress": null,
            "containers": [],
            "images": [],
            "release": null,
        }))
        .into_response();
    };

    let cur_app = current.iter().find(|a| a.app_id == app_id);
    let tgt_app = target_apps.iter().find(|a| a.app_id == app_id);
    let downloads = ctx.manager.downloads();

    let containers: Vec<serde_json::Value> = cur_app
        .map(|app: &App| {
            app.services
                .iter()
                .map(|s| {
                    json!({
                        "status": s.status.to_string(),
                        "serviceName": s.service_name,
                        "appId": s.app_id,
                        "imageId": s.image_id,
                        "serviceId": s.service_id,
                        "containerId": s.container_id,
                        "createdAt": s.created_at,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let images: Vec<serde_json::Value> = tgt_app
        .map(|app| {
            app.services
                .iter()
                .map(|s| {
                    let download = s
                        .image_id
                        .and_then(|id| downloads.iter().find(|d| d.image_id == id).cloned());
                    let (status, progress) = match &download {
                        Some(d) => (
                            match d.status {
                                ImageStatus::Downloading => "Downloading",
                                ImageStatus::Downloaded => "Downloaded",
                                ImageStatus::Deleting => "Deleting",
                            },
                            d.download_progress,
                        ),
                        None => ("Downloaded", None),
                    };
                    json!({
                        "name": s.image,
                        "appId": s.app_id,
                        "serviceName": s.service_name,
                        "imageId": s.image_id,
                        "status": status,
                        "downloadProgress": progress,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let app_state = if ctx.apply.apply_in_progress() { "applying" } else { "applied" };
    Json(json!({
        "status": "success",
        "appState": app_state,
        "overallDownloadProgress": ctx.manager.overall_download_progress(),
        "containers": containers,
        "images": images,
        "release": ctx.target.get_commit_for_app(app_id),
    }))
    .into_response()
}

/// Container id lookup, one service or all of them.
pub(crate) async fn container_id(
    State(ctx): State<Arc<ApiCtx>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let ids = match ctx.manager.container_ids().await {
        Ok(ids) => ids,
        Err(e) => return error_response(&e).into_response(),
    };
    match params.get("serviceName") {
        Some(name) => match ids.get(name) {
            Some(id) => Json(json!({ "status": "success", "containerId": id })).into_response(),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "failed", "message": "Could not find service" })),
            )
                .into_response(),
        },
        None => Json(json!({ "status": "success", "services": ids })).into_response(),
    }
}
