// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP control API.
//!
//! Authenticated local surface for operators, cloud clients and co-resident
//! workloads. State-changing handlers build one composition step through
//! the application manager and dispatch it through the executor, so they
//! obey the same lock discipline as apply cycles.

mod actions;
mod auth;
mod host;
mod local;
mod state;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use steward_core::{EventBus, KeyedLocks, SupervisorError};
use steward_storage::{ConfigStore, KeyStore, TargetStore};

use crate::adapters::{HostPrimitive, StateReporter};
use crate::engine::{AppManager, ApplyHandle, StepExecutor};

/// VPN state patched in by the host integration; the API only reports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct VpnState {
    pub enabled: bool,
    pub connected: bool,
}

/// Shared context for all request handlers.
pub struct ApiCtx {
    pub manager: AppManager,
    pub executor: StepExecutor,
    pub apply: ApplyHandle,
    pub target: Arc<TargetStore>,
    pub config: Arc<ConfigStore>,
    pub keys: Arc<KeyStore>,
    pub host: Arc<dyn HostPrimitive>,
    pub reporter: Arc<dyn StateReporter>,
    pub events: EventBus,
    pub locks: KeyedLocks,
    pub vpn: Arc<Mutex<VpnState>>,
}

/// Build the full route table.
pub fn router(ctx: Arc<ApiCtx>) -> Router {
    let authed = Router::new()
        .route("/v2/device/vpn", get(state::device_vpn))
        .route("/v2/applications/:app_id/state", get(state::app_state))
        .route("/v2/state/status", get(state::state_status))
        .route("/v2/applications/:app_id/start-service", post(actions::start_service))
        .route("/v2/applications/:app_id/stop-service", post(actions::stop_service))
        .route("/v2/applications/:app_id/restart-service", post(actions::restart_service))
        .route("/v2/applications/:app_id/purge", post(actions::purge))
        .route("/v2/applications/:app_id/restart", post(actions::restart_app))
        .route("/v2/blink", post(host::blink))
        .route("/v2/regenerate-api-key", post(host::regenerate_api_key))
        .route("/v2/reboot", post(host::reboot))
        .route("/v2/shutdown", post(host::shutdown))
        .route("/v2/local/target-state", get(local::get_target_state).post(local::set_target_state))
        .route("/v2/containerId", get(state::container_id))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&ctx), auth::require_key));

    Router::new()
        .route("/v2/healthy", get(state::healthy))
        .merge(authed)
        .with_state(ctx)
}

/// Serve the API until the listener closes.
pub async fn serve(ctx: Arc<ApiCtx>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router(ctx)).await
}

/// Map an error onto the API status contract.
pub(crate) fn error_response(e: &SupervisorError) -> (StatusCode, String) {
    let status = match e {
        SupervisorError::UpdatesLocked => StatusCode::LOCKED,
        SupervisorError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
        SupervisorError::AppNotFound(_) => StatusCode::CONFLICT,
        SupervisorError::OutOfScope(_) => StatusCode::UNAUTHORIZED,
        SupervisorError::Validation(_) => StatusCode::BAD_REQUEST,
        SupervisorError::Runtime(_) | SupervisorError::Inconsistency(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

/// Path app ids arrive as strings; anything non-numeric is a client error.
pub(crate) fn parse_app_id(raw: &str) -> Result<u32, (StatusCode, String)> {
    raw.parse::<u32>()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid app id: {raw}")))
}

/// 401 when the key's scope excludes the app.
pub(crate) fn require_scope(
    scope: &steward_storage::Scope,
    app_id: u32,
) -> Result<(), (StatusCode, String)> {
    if scope.is_scoped(app_id) {
        Ok(())
    } else {
        let (status, body) = error_response(&SupervisorError::OutOfScope(app_id));
        Err((status, body))
    }
}
