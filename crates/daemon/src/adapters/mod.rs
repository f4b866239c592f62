// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter seams to the outside world.
//!
//! [`ContainerRuntime`] is the only component that performs runtime I/O;
//! the planner and executor treat it as pure from their side. Service
//! identity travels in `io.steward.*` labels so the current state can be
//! joined back from any conforming runtime, real or fake.

pub mod docker;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod host;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use steward_core::app::LABEL_PREFIX;
use steward_core::{Network, Service, ServiceStatus, UpdateStrategy, Volume};
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeHost, FakeRuntime, RuntimeCall};
pub use docker::DockerRuntime;
pub use host::SystemHost;

/// Errors from container runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("runtime request failed: {0}")]
    Request(String),
    #[error("unexpected runtime response ({status}): {body}")]
    Response { status: u16, body: String },
}

impl From<RuntimeError> for steward_core::SupervisorError {
    fn from(e: RuntimeError) -> Self {
        steward_core::SupervisorError::Runtime(e.to_string())
    }
}

/// One row of a container listing.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    /// Runtime state string (`running`, `exited`, ...).
    pub state: String,
    /// Creation time, epoch ms.
    pub created_at: Option<u64>,
}

/// Full view of one container.
#[derive(Debug, Clone)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    pub image: String,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub state: String,
    pub created_at: Option<u64>,
}

/// One locally available image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub id: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Progress of an image pull, 0-100.
#[derive(Debug, Clone, Copy)]
pub struct PullProgress {
    pub percentage: u8,
}

/// A runtime lifecycle event (container started, died, ...).
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub action: String,
    pub container_id: Option<String>,
}

/// Thin contract over the container runtime.
///
/// All operations are cancellable by dropping the returned future; the
/// adapter enforces its own timeouts.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;
    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError>;
    async fn inspect(&self, container_id: &str) -> Result<ContainerDetail, RuntimeError>;
    /// Create a container for the service; returns the container id.
    async fn create(&self, service: &Service) -> Result<String, RuntimeError>;
    async fn start(&self, container_id: &str) -> Result<(), RuntimeError>;
    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<(), RuntimeError>;
    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError>;
    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;
    /// Rename a container to its new bookkeeping name (metadata updates).
    async fn rename(&self, container_id: &str, name: &str) -> Result<(), RuntimeError>;
    /// Pull an image, reporting progress; returns the runtime image id.
    async fn pull_image(
        &self,
        name: &str,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<String, RuntimeError>;
    /// Stream of runtime lifecycle events.
    async fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>, RuntimeError>;

    async fn create_network(&self, network: &Network) -> Result<(), RuntimeError>;
    async fn remove_network(&self, network: &Network) -> Result<(), RuntimeError>;
    async fn list_networks(&self) -> Result<Vec<NetworkInfo>, RuntimeError>;
    async fn create_volume(&self, volume: &Volume) -> Result<(), RuntimeError>;
    async fn remove_volume(&self, volume: &Volume) -> Result<(), RuntimeError>;
    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError>;
}

/// Host power and indicator primitives; each returns after the host
/// acknowledges. Reboot and shutdown are not cancellable once dispatched.
#[async_trait]
pub trait HostPrimitive: Send + Sync {
    async fn reboot(&self) -> Result<(), RuntimeError>;
    async fn shutdown(&self) -> Result<(), RuntimeError>;
    async fn blink_start(&self) -> Result<(), RuntimeError>;
    async fn blink_stop(&self) -> Result<(), RuntimeError>;
}

/// Publishes current-state report fields to the external change channel.
pub trait StateReporter: Send + Sync {
    fn report(&self, fields: serde_json::Value);
}

/// Reporter backed by the event bus `change` channel.
pub struct EventReporter(pub steward_core::EventBus);

impl StateReporter for EventReporter {
    fn report(&self, fields: serde_json::Value) {
        self.0.publish_current_state_change(fields);
    }
}

// === Label codec ===
//
// Everything needed to rebuild a Service from a runtime snapshot is encoded
// in labels at create time. Opaque composition config rides along as JSON;
// it has no runtime-visible shape to recover it from otherwise.

pub const LABEL_SUPERVISED: &str = "io.steward.supervised";
pub const LABEL_APP_ID: &str = "io.steward.app-id";
pub const LABEL_SERVICE_NAME: &str = "io.steward.service-name";
pub const LABEL_SERVICE_ID: &str = "io.steward.service-id";
pub const LABEL_IMAGE_ID: &str = "io.steward.image-id";
pub const LABEL_RELEASE_ID: &str = "io.steward.release-id";
pub const LABEL_STRATEGY: &str = "io.steward.update-strategy";
pub const LABEL_COMPOSITION: &str = "io.steward.composition";
pub const LABEL_CONFIG: &str = "io.steward.config";

/// The labels stamped on a service's container: the user's own labels plus
/// steward's bookkeeping.
pub fn service_labels(service: &Service) -> BTreeMap<String, String> {
    let mut labels = service.labels.clone();
    labels.insert(LABEL_SUPERVISED.into(), "true".into());
    labels.insert(LABEL_APP_ID.into(), service.app_id.to_string());
    labels.insert(LABEL_SERVICE_NAME.into(), service.service_name.clone());
    if let Some(id) = service.service_id {
        labels.insert(LABEL_SERVICE_ID.into(), id.to_string());
    }
    if let Some(id) = service.image_id {
        labels.insert(LABEL_IMAGE_ID.into(), id.to_string());
    }
    if let Some(id) = service.release_id {
        labels.insert(LABEL_RELEASE_ID.into(), id.to_string());
    }
    if service.update_strategy == UpdateStrategy::HandOver {
        labels.insert(LABEL_STRATEGY.into(), "hand-over".into());
    }
    if !service.composition.is_empty() {
        if let Ok(json) = serde_json::to_string(&service.composition) {
            labels.insert(LABEL_COMPOSITION.into(), json);
        }
    }
    labels
}

fn parse_label<T: std::str::FromStr>(labels: &BTreeMap<String, String>, key: &str) -> Option<T> {
    labels.get(key).and_then(|v| v.parse().ok())
}

/// Map a runtime state string onto a service status.
pub fn status_from_state(state: &str) -> ServiceStatus {
    match state {
        "running" => ServiceStatus::Running,
        "restarting" => ServiceStatus::Starting,
        "created" => ServiceStatus::Installed,
        "paused" | "exited" => ServiceStatus::Exited,
        "dead" => ServiceStatus::Dead,
        "removing" => ServiceStatus::Stopping,
        _ => ServiceStatus::Stopped,
    }
}

/// Rebuild the logical service from an inspected container.
///
/// `None` when the container is not a supervised one.
pub fn service_from_detail(detail: &ContainerDetail) -> Option<Service> {
    if detail.labels.get(LABEL_SUPERVISED).map(String::as_str) != Some("true") {
        return None;
    }
    let app_id: u32 = parse_label(&detail.labels, LABEL_APP_ID)?;
    let service_name = detail.labels.get(LABEL_SERVICE_NAME)?.clone();
    let composition = detail
        .labels
        .get(LABEL_COMPOSITION)
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();
    let update_strategy = detail
        .labels
        .get(LABEL_STRATEGY)
        .map(|v| UpdateStrategy::from_label(v))
        .unwrap_or_default();
    let user_labels: BTreeMap<String, String> = detail
        .labels
        .iter()
        .filter(|(k, _)| !k.starts_with(LABEL_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let status = status_from_state(&detail.state);

    Some(Service {
        app_id,
        service_name,
        service_id: parse_label(&detail.labels, LABEL_SERVICE_ID),
        release_id: parse_label(&detail.labels, LABEL_RELEASE_ID),
        image: detail.image.clone(),
        image_id: parse_label(&detail.labels, LABEL_IMAGE_ID),
        container_id: Some(detail.id.clone()),
        status,
        environment: detail.environment.clone(),
        labels: user_labels,
        running: status == ServiceStatus::Running || status == ServiceStatus::Starting,
        update_strategy,
        composition,
        created_at: detail.created_at,
    })
}

/// Labels for app-scoped networks and volumes.
pub fn resource_labels(
    app_id: u32,
    config: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_SUPERVISED.into(), "true".into());
    labels.insert(LABEL_APP_ID.into(), app_id.to_string());
    if !config.is_empty() {
        if let Ok(json) = serde_json::to_string(config) {
            labels.insert(LABEL_CONFIG.into(), json);
        }
    }
    labels
}

/// Rebuild a network from a runtime listing row.
pub fn network_from_info(info: &NetworkInfo) -> Option<Network> {
    let app_id: u32 = parse_label(&info.labels, LABEL_APP_ID)?;
    let name = info.name.strip_prefix(&format!("{app_id}_"))?.to_string();
    let config = info
        .labels
        .get(LABEL_CONFIG)
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();
    Some(Network { app_id, name, config })
}

/// Rebuild a volume from a runtime listing row.
pub fn volume_from_info(info: &VolumeInfo) -> Option<Volume> {
    let app_id: u32 = parse_label(&info.labels, LABEL_APP_ID)?;
    let name = info.name.strip_prefix(&format!("{app_id}_"))?.to_string();
    let config = info
        .labels
        .get(LABEL_CONFIG)
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();
    Some(Volume { app_id, name, config })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
