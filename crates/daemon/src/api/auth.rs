// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key authentication middleware.
//!
//! Accepts `Authorization: Bearer <key>` or `?apikey=<key>`, validates
//! against the key store and attaches the resulting [`Scope`] to the
//! request. Local mode bypasses auth with full scope.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use steward_storage::Scope;

use super::ApiCtx;

/// The raw presented key, kept for regenerate-api-key.
#[derive(Debug, Clone)]
pub(crate) struct AuthToken(pub String);

pub(crate) async fn require_key(
    State(ctx): State<Arc<ApiCtx>>,
    mut req: Request,
    next: Next,
) -> Response {
    if ctx.config.local_mode() {
        req.extensions_mut().insert(Scope::All);
        return next.run(req).await;
    }

    let token = bearer_token(req.headers()).or_else(|| apikey_param(req.uri()));
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };
    let Some(scope) = ctx.keys.validate(&token) else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };
    req.extensions_mut().insert(scope);
    req.extensions_mut().insert(AuthToken(token));
    next.run(req).await
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn apikey_param(uri: &Uri) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "apikey")
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
