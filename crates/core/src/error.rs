// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared across the supervisor.

use thiserror::Error;

/// Errors surfaced by the planner, executor, stores and Control API.
///
/// The Control API maps these onto status codes; the apply loop absorbs them
/// into its backoff schedule and never terminates the process over one.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A co-resident workload holds an advisory update lock.
    #[error("updates are locked")]
    UpdatesLocked,

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("application not found: {0}")]
    AppNotFound(u32),

    /// The authenticating key's scope excludes the affected app.
    #[error("application {0} is not in the key's scope")]
    OutOfScope(u32),

    #[error("{0}")]
    Validation(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    /// An invariant check failed; fatal for the current cycle, retried.
    #[error("internal inconsistency: {0}")]
    Inconsistency(String),
}

impl SupervisorError {
    pub fn is_updates_locked(&self) -> bool {
        matches!(self, SupervisorError::UpdatesLocked)
    }
}
