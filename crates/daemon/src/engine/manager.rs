// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application manager.
//!
//! Joins runtime snapshots into current [`App`] views and builds the
//! single-step paths the Control API dispatches through the executor:
//! start/stop/restart a service, restart an app, purge, and the stop-all
//! used by reboot and shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use steward_core::{App, Image, Service, Step, SupervisorError};
use steward_storage::TargetStore;
use tracing::warn;

use crate::adapters::{
    network_from_info, service_from_detail, volume_from_info, ContainerRuntime, ImageInfo,
    RuntimeError,
};

/// How a Control-API mutation addresses a service. Image id wins when both
/// are supplied.
#[derive(Debug, Clone)]
pub enum ServiceSelector {
    ImageId(u32),
    Name(String),
}

impl ServiceSelector {
    fn find<'a>(&self, app: &'a App) -> Option<&'a Service> {
        match self {
            ServiceSelector::ImageId(id) => app.service_by_image_id(*id),
            ServiceSelector::Name(name) => app.service(name),
        }
    }

    fn describe(&self) -> String {
        match self {
            ServiceSelector::ImageId(id) => format!("imageId {id}"),
            ServiceSelector::Name(name) => name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppManager {
    runtime: Arc<dyn ContainerRuntime>,
    target: Arc<TargetStore>,
    /// Image download state, keyed by image id; feeds status endpoints.
    downloads: Arc<Mutex<BTreeMap<u32, Image>>>,
}

impl AppManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, target: Arc<TargetStore>) -> Self {
        Self { runtime, target, downloads: Arc::new(Mutex::new(BTreeMap::new())) }
    }

    /// Shared download map handed to the executor at wiring time.
    pub fn downloads_handle(&self) -> Arc<Mutex<BTreeMap<u32, Image>>> {
        Arc::clone(&self.downloads)
    }

    /// Snapshot of images currently tracked as downloading or downloaded.
    pub fn downloads(&self) -> Vec<Image> {
        self.downloads.lock().values().cloned().collect()
    }

    /// Mean progress over images still downloading, if any.
    pub fn overall_download_progress(&self) -> Option<u8> {
        let downloads = self.downloads.lock();
        let in_flight: Vec<u8> = downloads
            .values()
            .filter(|i| i.status == steward_core::ImageStatus::Downloading)
            .map(|i| i.download_progress.unwrap_or(0))
            .collect();
        if in_flight.is_empty() {
            return None;
        }
        Some((in_flight.iter().map(|p| *p as u32).sum::<u32>() / in_flight.len() as u32) as u8)
    }

    /// Join runtime snapshots into the current apps, ascending app id.
    ///
    /// Containers carrying the supervised label parse into services; one
    /// that no longer parses is skipped with a warning and the next cycle's
    /// orphan sweep removes it. Unlabeled containers are invisible.
    pub async fn get_current_apps(&self) -> Result<Vec<App>, SupervisorError> {
        let mut apps: BTreeMap<u32, App> = BTreeMap::new();

        for info in self.runtime.list_containers().await? {
            let detail = match self.runtime.inspect(&info.id).await {
                Ok(detail) => detail,
                // Raced away between list and inspect
                Err(RuntimeError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let Some(service) = service_from_detail(&detail) else {
                warn!(container = %info.id, "supervised container with unparsable identity");
                continue;
            };
            apps.entry(service.app_id)
                .or_insert_with(|| empty_app(service.app_id))
                .services
                .push(service);
        }

        for info in self.runtime.list_networks().await? {
            if let Some(network) = network_from_info(&info) {
                apps.entry(network.app_id)
                    .or_insert_with(|| empty_app(network.app_id))
                    .networks
                    .push(network);
            }
        }
        for info in self.runtime.list_volumes().await? {
            if let Some(volume) = volume_from_info(&info) {
                apps.entry(volume.app_id)
                    .or_insert_with(|| empty_app(volume.app_id))
                    .volumes
                    .push(volume);
            }
        }

        Ok(apps.into_values().collect())
    }

    pub async fn available_images(&self) -> Result<Vec<ImageInfo>, SupervisorError> {
        Ok(self.runtime.list_images().await?)
    }

    /// The instantiated target app, or `AppNotFound`.
    fn target_app(&self, app_id: u32) -> Result<App, SupervisorError> {
        self.target
            .get_target_app(app_id)
            .map(|app| app.instantiate(app_id))
            .ok_or(SupervisorError::AppNotFound(app_id))
    }

    async fn current_service(&self, app_id: u32, selector: &ServiceSelector) -> Option<Service> {
        let current = self.get_current_apps().await.ok()?;
        current
            .iter()
            .find(|a| a.app_id == app_id)
            .and_then(|app| selector.find(app))
            .cloned()
    }

    /// Build the `start` step for a Control-API start-service call.
    pub async fn start_step(
        &self,
        app_id: u32,
        selector: &ServiceSelector,
    ) -> Result<Step, SupervisorError> {
        let app = self.target_app(app_id)?;
        let mut target = selector
            .find(&app)
            .cloned()
            .ok_or_else(|| SupervisorError::ServiceNotFound(selector.describe()))?;
        // Reuse an existing stopped container when there is one
        if let Some(cur) = self.current_service(app_id, selector).await {
            target.container_id = cur.container_id;
        }
        Ok(Step::Start { target })
    }

    /// Build the `stop` step for a Control-API stop-service call.
    pub async fn stop_step(
        &self,
        app_id: u32,
        selector: &ServiceSelector,
    ) -> Result<Step, SupervisorError> {
        let app = self.target_app(app_id)?;
        let in_target = selector.find(&app).cloned();
        match self.current_service(app_id, selector).await {
            Some(service) => Ok(Step::Stop { service }),
            None => {
                // Known but not instantiated: stopping is a no-op.
                let service = in_target
                    .ok_or_else(|| SupervisorError::ServiceNotFound(selector.describe()))?;
                Ok(Step::Stop { service })
            }
        }
    }

    /// Build the `restart` step for a Control-API restart-service call.
    pub async fn restart_step(
        &self,
        app_id: u32,
        selector: &ServiceSelector,
    ) -> Result<Step, SupervisorError> {
        let app = self.target_app(app_id)?;
        let target = selector
            .find(&app)
            .cloned()
            .ok_or_else(|| SupervisorError::ServiceNotFound(selector.describe()))?;
        let current = self
            .current_service(app_id, selector)
            .await
            .unwrap_or_else(|| target.clone());
        Ok(Step::Restart { current, target })
    }

    /// Restart every service of the app.
    pub async fn restart_app_steps(&self, app_id: u32) -> Result<Vec<Step>, SupervisorError> {
        let app = self.target_app(app_id)?;
        let current = self.get_current_apps().await?;
        let cur_app = current.iter().find(|a| a.app_id == app_id);
        Ok(app
            .services
            .iter()
            .map(|target| {
                let current = cur_app
                    .and_then(|a| a.service(&target.service_name))
                    .cloned()
                    .unwrap_or_else(|| target.clone());
                Step::Restart { current, target: target.clone() }
            })
            .collect())
    }

    /// The purge step; the app must be known on at least one side.
    pub async fn purge_step(&self, app_id: u32) -> Result<Step, SupervisorError> {
        if self.target.get_target_app(app_id).is_none() {
            let current = self.get_current_apps().await?;
            if !current.iter().any(|a| a.app_id == app_id) {
                return Err(SupervisorError::AppNotFound(app_id));
            }
        }
        Ok(Step::Purge { app_id })
    }

    /// Stop steps for every current service, used by reboot and shutdown.
    pub async fn stop_all_steps(&self) -> Result<Vec<Step>, SupervisorError> {
        let current = self.get_current_apps().await?;
        Ok(current
            .iter()
            .flat_map(|app| app.services.iter())
            .map(|service| Step::Stop { service: service.clone() })
            .collect())
    }

    /// Container id lookup for the `containerId` endpoint.
    pub async fn container_ids(&self) -> Result<BTreeMap<String, String>, SupervisorError> {
        let current = self.get_current_apps().await?;
        Ok(current
            .iter()
            .flat_map(|app| app.services.iter())
            .filter_map(|s| {
                s.container_id.as_ref().map(|id| (s.service_name.clone(), id.clone()))
            })
            .collect())
    }
}

fn empty_app(app_id: u32) -> App {
    App {
        app_id,
        name: String::new(),
        commit: None,
        source: None,
        release_id: None,
        services: Vec::new(),
        networks: Vec::new(),
        volumes: Vec::new(),
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
