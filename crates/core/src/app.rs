// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Applications and their services.
//!
//! An [`App`] is the unit of reconciliation: one release of one application,
//! with its services, networks and volumes. The same type describes both the
//! *target* instantiation (from the stored target state) and the *current*
//! instantiation (joined from runtime snapshots); a service's `container_id`
//! is present only on the current side.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::{Network, Volume};

/// Label namespace steward stamps on every container it manages.
pub const LABEL_PREFIX: &str = "io.steward.";

/// One application (target or current instantiation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub app_id: u32,
    pub name: String,
    /// Opaque release identifier. On the current side this is the commit of
    /// the last fully-applied release, not an in-progress one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Origin URL the release was fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u32>,
    /// Declaration order is preserved; planners emit service steps in this order.
    pub services: Vec<Service>,
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl App {
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.service_name == name)
    }

    pub fn service_by_image_id(&self, image_id: u32) -> Option<&Service> {
        self.services.iter().find(|s| s.image_id == Some(image_id))
    }
}

/// One service of an application.
///
/// Keyed by `(app_id, service_name)`; within a release the service is also
/// uniquely addressed by its `image_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub app_id: u32,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u32>,
    /// Image reference (registry name), e.g. `registry2.example.com/v2/abc`.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<u32>,
    /// Present only when the service is instantiated in the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub status: ServiceStatus,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Target intent: should this service be running.
    #[serde(default = "default_running")]
    pub running: bool,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    /// Remaining composition config (ports, mounts, restart policy, ...),
    /// compared structurally.
    #[serde(default)]
    pub composition: BTreeMap<String, serde_json::Value>,
    /// Runtime creation time (epoch ms); used to pick the survivor among
    /// duplicate containers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

fn default_running() -> bool {
    true
}

impl Service {
    /// User-visible labels, with steward's own bookkeeping labels stripped.
    fn user_labels(&self) -> BTreeMap<&str, &str> {
        self.labels
            .iter()
            .filter(|(k, _)| !k.starts_with(LABEL_PREFIX))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Structural config equality: image, environment, user labels and
    /// composition. Release bookkeeping (`release_id`, `image_id`) and
    /// runtime state are deliberately excluded.
    pub fn same_config(&self, other: &Service) -> bool {
        self.image == other.image
            && self.environment == other.environment
            && self.user_labels() == other.user_labels()
            && self.composition == other.composition
    }

    /// True when the configs match and only release bookkeeping moved on,
    /// so the container can be relabeled in place instead of recreated.
    pub fn only_metadata_differs(&self, other: &Service) -> bool {
        self.same_config(other)
            && (self.release_id != other.release_id || self.image_id != other.image_id)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, ServiceStatus::Running | ServiceStatus::Starting)
    }

    /// Container name encoding the service's release bookkeeping.
    pub fn container_name(&self) -> String {
        format!(
            "{}_{}_{}",
            self.service_name,
            self.image_id.unwrap_or(0),
            self.release_id.unwrap_or(0)
        )
    }
}

/// Observed or intended service state, as reported by status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Installing,
    Installed,
    Starting,
    Running,
    Stopping,
    Stopped,
    Dead,
    #[serde(rename = "exited")]
    Exited,
    Downloading,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Installing => "Installing",
            ServiceStatus::Installed => "Installed",
            ServiceStatus::Starting => "Starting",
            ServiceStatus::Running => "Running",
            ServiceStatus::Stopping => "Stopping",
            ServiceStatus::Stopped => "Stopped",
            ServiceStatus::Dead => "Dead",
            ServiceStatus::Exited => "exited",
            ServiceStatus::Downloading => "Downloading",
        };
        f.write_str(s)
    }
}

/// How a service transitions between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStrategy {
    /// Kill the old container, then start the replacement.
    #[default]
    Recreate,
    /// Start the replacement first, quiesce, then stop the old container.
    HandOver,
}

impl UpdateStrategy {
    /// Parse the strategy from a container label value.
    pub fn from_label(value: &str) -> Self {
        match value {
            "hand-over" | "handover" => UpdateStrategy::HandOver,
            _ => UpdateStrategy::Recreate,
        }
    }
}

/// Per-service runtime intent superimposed on the stored target without
/// mutating it. Set by the Control API (explicit start/stop), cleared for an
/// app whenever that app's target changes.
#[derive(Debug, Clone, Default)]
pub struct VolatileOverlay {
    running: HashMap<(u32, String), bool>,
}

impl VolatileOverlay {
    pub fn set_running(&mut self, app_id: u32, service_name: &str, running: bool) {
        self.running.insert((app_id, service_name.to_string()), running);
    }

    pub fn running(&self, app_id: u32, service_name: &str) -> Option<bool> {
        self.running.get(&(app_id, service_name.to_string())).copied()
    }

    pub fn clear_app(&mut self, app_id: u32) {
        self.running.retain(|(id, _), _| *id != app_id);
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
