// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host actions: reboot, shutdown, blink, key regeneration.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;
use tracing::info;

use super::auth::AuthToken;
use super::{error_response, ApiCtx};
use crate::engine::{pausing_apply, ExecOpts};

const BLINK_DURATION: Duration = Duration::from_millis(15_000);

#[derive(Debug, serde::Deserialize, Default)]
pub(crate) struct HostActionBody {
    #[serde(default)]
    force: bool,
}

enum PowerAction {
    Reboot,
    Shutdown,
}

/// Stop every service under the update locks, then hand over to the host.
/// Not cancellable once the primitive is invoked.
///
/// Runs under the pause gate and the inferSteps lock: no apply cycle can
/// plan or restart services while the device is going down. On failure the
/// gate releases and the loop carries on.
async fn power_action(ctx: &ApiCtx, force: bool, action: PowerAction) -> Response {
    pausing_apply(&ctx.locks, || async move {
        // Wait out an in-flight cycle before stopping anything
        let _infer = ctx.locks.write("inferSteps").await;

        let steps = match ctx.manager.stop_all_steps().await {
            Ok(steps) => steps,
            Err(e) => return error_response(&e).into_response(),
        };
        let summary =
            ctx.executor.execute_all(steps, ExecOpts { force, skip_lock: false }).await;
        if let Err(e) = summary.into_result() {
            return error_response(&e).into_response();
        }

        let result = match action {
            PowerAction::Reboot => {
                info!("Rebooting device");
                ctx.host.reboot().await
            }
            PowerAction::Shutdown => {
                info!("Shutting down device");
                ctx.host.shutdown().await
            }
        };
        if let Err(e) = result {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }

        ctx.apply.mark_shutting_down();
        ctx.events.publish_shutdown();
        (StatusCode::ACCEPTED, Json(json!({ "Data": "OK", "Error": null }))).into_response()
    })
    .await
}

pub(crate) async fn reboot(
    State(ctx): State<Arc<ApiCtx>>,
    body: Option<Json<HostActionBody>>,
) -> Response {
    let force = body.map(|Json(b)| b.force).unwrap_or(false);
    power_action(&ctx, force, PowerAction::Reboot).await
}

pub(crate) async fn shutdown(
    State(ctx): State<Arc<ApiCtx>>,
    body: Option<Json<HostActionBody>>,
) -> Response {
    let force = body.map(|Json(b)| b.force).unwrap_or(false);
    power_action(&ctx, force, PowerAction::Shutdown).await
}

/// Fire-and-forget visual pattern; the stop is scheduled, not awaited.
pub(crate) async fn blink(State(ctx): State<Arc<ApiCtx>>) -> Response {
    let host = Arc::clone(&ctx.host);
    tokio::spawn(async move {
        if let Err(e) = host.blink_start().await {
            tracing::warn!(error = %e, "blink start failed");
            return;
        }
        tokio::time::sleep(BLINK_DURATION).await;
        if let Err(e) = host.blink_stop().await {
            tracing::warn!(error = %e, "blink stop failed");
        }
    });
    StatusCode::OK.into_response()
}

/// Issue a new token for the authenticating key; the old one is revoked
/// before this response is sent. A new cloud key is reported on the
/// external state channel.
pub(crate) async fn regenerate_api_key(
    State(ctx): State<Arc<ApiCtx>>,
    token: Option<Extension<AuthToken>>,
) -> Response {
    let Some(Extension(AuthToken(token))) = token else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "no API key presented to regenerate".to_string(),
        )
            .into_response();
    };
    match ctx.keys.regenerate(&token) {
        Ok(fresh) => {
            if fresh.is_cloud {
                ctx.reporter.report(json!({ "api_key": fresh.token }));
            }
            (StatusCode::OK, fresh.token).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
