// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local-mode target state endpoints.
//!
//! In local mode the device accepts target state directly from this API
//! and ignores cloud polling; outside local mode the POST is rejected.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::{error_response, ApiCtx};

pub(crate) async fn get_target_state(State(ctx): State<Arc<ApiCtx>>) -> Response {
    let state = ctx.target.get_target(false).await;
    Json(json!({ "status": "success", "state": state })).into_response()
}

pub(crate) async fn set_target_state(
    State(ctx): State<Arc<ApiCtx>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !ctx.config.local_mode() {
        return (
            StatusCode::BAD_REQUEST,
            "Target state can only be set when local mode is enabled".to_string(),
        )
            .into_response();
    }
    if let Err(e) = ctx.target.set_target_raw(&body).await {
        return error_response(&e).into_response();
    }
    ctx.apply.trigger(false, Duration::ZERO, true);
    (StatusCode::OK, "OK").into_response()
}
