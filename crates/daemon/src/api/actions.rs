// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service and application mutations.
//!
//! Every handler follows the same discipline: parse and validate inputs,
//! check the key's scope against the affected app, build one step through
//! the manager, dispatch through the executor with `{force}`, and map the
//! outcome onto the status contract.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use steward_core::Step;
use steward_storage::Scope;

use super::{error_response, parse_app_id, require_scope, ApiCtx};
use crate::engine::{ExecOpts, ServiceSelector};

type ApiError = (StatusCode, String);
type ApiResult = Result<(StatusCode, String), ApiError>;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceActionBody {
    service_name: Option<String>,
    image_id: Option<u32>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct AppActionBody {
    #[serde(default)]
    force: bool,
}

impl ServiceActionBody {
    /// Image id wins when both addressings are supplied.
    fn selector(&self) -> Result<ServiceSelector, ApiError> {
        match (self.image_id, &self.service_name) {
            (Some(id), _) => Ok(ServiceSelector::ImageId(id)),
            (None, Some(name)) => Ok(ServiceSelector::Name(name.clone())),
            (None, None) => Err((
                StatusCode::BAD_REQUEST,
                "serviceName or imageId is required".to_string(),
            )),
        }
    }
}

pub(crate) async fn start_service(
    State(ctx): State<Arc<ApiCtx>>,
    Path(app_id): Path<String>,
    Extension(scope): Extension<Scope>,
    Json(body): Json<ServiceActionBody>,
) -> ApiResult {
    let app_id = parse_app_id(&app_id)?;
    require_scope(&scope, app_id)?;
    let selector = body.selector()?;

    let step = ctx.manager.start_step(app_id, &selector).await.map_err(|e| error_response(&e))?;
    if let Some(name) = step.service_name() {
        ctx.target.set_volatile_running(app_id, name, true);
    }
    ctx.executor.execute_one(step, body.force).await.map_err(|e| error_response(&e))?;
    Ok((StatusCode::OK, "OK".to_string()))
}

pub(crate) async fn stop_service(
    State(ctx): State<Arc<ApiCtx>>,
    Path(app_id): Path<String>,
    Extension(scope): Extension<Scope>,
    Json(body): Json<ServiceActionBody>,
) -> ApiResult {
    let app_id = parse_app_id(&app_id)?;
    require_scope(&scope, app_id)?;
    let selector = body.selector()?;

    let step = ctx.manager.stop_step(app_id, &selector).await.map_err(|e| error_response(&e))?;
    // Until the target changes, the declared intent for this service is
    // not-running.
    if let Some(name) = step.service_name() {
        ctx.target.set_volatile_running(app_id, name, false);
    }
    ctx.executor.execute_one(step, body.force).await.map_err(|e| error_response(&e))?;
    Ok((StatusCode::OK, "OK".to_string()))
}

pub(crate) async fn restart_service(
    State(ctx): State<Arc<ApiCtx>>,
    Path(app_id): Path<String>,
    Extension(scope): Extension<Scope>,
    Json(body): Json<ServiceActionBody>,
) -> ApiResult {
    let app_id = parse_app_id(&app_id)?;
    require_scope(&scope, app_id)?;
    let selector = body.selector()?;

    let step =
        ctx.manager.restart_step(app_id, &selector).await.map_err(|e| error_response(&e))?;
    ctx.executor.execute_one(step, body.force).await.map_err(|e| error_response(&e))?;
    Ok((StatusCode::OK, "OK".to_string()))
}

pub(crate) async fn restart_app(
    State(ctx): State<Arc<ApiCtx>>,
    Path(app_id): Path<String>,
    Extension(scope): Extension<Scope>,
    Json(body): Json<AppActionBody>,
) -> ApiResult {
    let app_id = parse_app_id(&app_id)?;
    require_scope(&scope, app_id)?;

    let steps = ctx.manager.restart_app_steps(app_id).await.map_err(|e| error_response(&e))?;
    let summary = ctx
        .executor
        .execute_all(steps, ExecOpts { force: body.force, skip_lock: false })
        .await;
    summary.into_result().map_err(|e| error_response(&e))?;
    Ok((StatusCode::OK, "OK".to_string()))
}

pub(crate) async fn purge(
    State(ctx): State<Arc<ApiCtx>>,
    Path(app_id): Path<String>,
    Extension(scope): Extension<Scope>,
    Json(body): Json<AppActionBody>,
) -> ApiResult {
    let app_id = parse_app_id(&app_id)?;
    require_scope(&scope, app_id)?;

    let step: Step = ctx.manager.purge_step(app_id).await.map_err(|e| error_response(&e))?;
    ctx.executor.execute_one(step, body.force).await.map_err(|e| error_response(&e))?;
    // Rebuild the app from target state
    ctx.apply.trigger(false, Duration::ZERO, true);
    Ok((StatusCode::OK, "OK".to_string()))
}
