// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed event fan-out.
//!
//! One broadcast channel per event kind; subscribers that lag simply miss
//! events, publishers never block. The no-subscriber send error is ignored
//! everywhere, so components can publish unconditionally.

use tokio::sync::broadcast;

/// Outcome of a completed step, published on `step_completed`.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub action: &'static str,
    pub app_id: Option<u32>,
    pub service_name: Option<String>,
}

/// A failed step, published on `step_error`.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub report: StepReport,
    pub error: String,
    pub updates_locked: bool,
}

const CHANNEL_CAPACITY: usize = 64;

/// Broadcast channels for every event kind the supervisor emits.
#[derive(Debug, Clone)]
pub struct EventBus {
    step_completed: broadcast::Sender<StepReport>,
    step_error: broadcast::Sender<StepFailure>,
    apply_end: broadcast::Sender<Option<String>>,
    target_state_changed: broadcast::Sender<()>,
    shutdown: broadcast::Sender<()>,
    current_state_change: broadcast::Sender<serde_json::Value>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            step_completed: broadcast::channel(CHANNEL_CAPACITY).0,
            step_error: broadcast::channel(CHANNEL_CAPACITY).0,
            apply_end: broadcast::channel(CHANNEL_CAPACITY).0,
            target_state_changed: broadcast::channel(CHANNEL_CAPACITY).0,
            shutdown: broadcast::channel(CHANNEL_CAPACITY).0,
            current_state_change: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn publish_step_completed(&self, report: StepReport) {
        let _ = self.step_completed.send(report);
    }

    pub fn publish_step_error(&self, failure: StepFailure) {
        let _ = self.step_error.send(failure);
    }

    /// `apply-target-state-end`: `None` on success, error message otherwise.
    pub fn publish_apply_end(&self, error: Option<String>) {
        let _ = self.apply_end.send(error);
    }

    pub fn publish_target_state_changed(&self) {
        let _ = self.target_state_changed.send(());
    }

    pub fn publish_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// `change` on the device report fields.
    pub fn publish_current_state_change(&self, fields: serde_json::Value) {
        let _ = self.current_state_change.send(fields);
    }

    pub fn subscribe_step_completed(&self) -> broadcast::Receiver<StepReport> {
        self.step_completed.subscribe()
    }

    pub fn subscribe_step_error(&self) -> broadcast::Receiver<StepFailure> {
        self.step_error.subscribe()
    }

    pub fn subscribe_apply_end(&self) -> broadcast::Receiver<Option<String>> {
        self.apply_end.subscribe()
    }

    pub fn subscribe_target_state_changed(&self) -> broadcast::Receiver<()> {
        self.target_state_changed.subscribe()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn subscribe_current_state_change(&self) -> broadcast::Receiver<serde_json::Value> {
        self.current_state_change.subscribe()
    }
}
