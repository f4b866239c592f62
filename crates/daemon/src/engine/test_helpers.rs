// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests: fake adapters wired into real stores
//! in a temp directory.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use steward_core::{EventBus, KeyedLocks, Service, ServiceStatus, UpdateStrategy};
use steward_storage::{ConfigStore, TargetStore};

use crate::adapters::FakeRuntime;
use crate::engine::apply::ApplyDeps;
use crate::engine::executor::StepExecutor;
use crate::engine::manager::AppManager;
use crate::engine::FetchGauge;
use crate::lock::UpdateLocks;

pub(crate) struct Harness {
    pub dir: tempfile::TempDir,
    pub runtime: FakeRuntime,
    pub target: Arc<TargetStore>,
    pub config: Arc<ConfigStore>,
    pub locks: KeyedLocks,
    pub events: EventBus,
    pub gauge: FetchGauge,
    pub manager: AppManager,
    pub executor: StepExecutor,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let locks = KeyedLocks::new();
        let events = EventBus::new();
        let runtime = FakeRuntime::new();
        let target = Arc::new(
            TargetStore::open(dir.path().join("target.json"), locks.clone(), events.clone())
                .unwrap(),
        );
        let config = Arc::new(ConfigStore::open(dir.path().join("config.json")).unwrap());
        let update_locks = Arc::new(UpdateLocks::new(
            dir.path().join("locks"),
            dir.path().join("legacy-locks"),
            locks.clone(),
        ));
        let gauge = FetchGauge::new();
        let runtime_arc: Arc<dyn crate::adapters::ContainerRuntime> = Arc::new(runtime.clone());
        let manager = AppManager::new(Arc::clone(&runtime_arc), Arc::clone(&target));
        let reporter = Arc::new(crate::adapters::EventReporter(events.clone()));
        let executor = StepExecutor::new(
            runtime_arc,
            update_locks,
            locks.clone(),
            Arc::clone(&config),
            events.clone(),
            reporter,
            manager.downloads_handle(),
            gauge.clone(),
        );
        Self { dir, runtime, target, config, locks, events, gauge, manager, executor }
    }

    pub fn deps(&self) -> ApplyDeps {
        ApplyDeps {
            manager: self.manager.clone(),
            executor: self.executor.clone(),
            target: Arc::clone(&self.target),
            config: Arc::clone(&self.config),
            locks: self.locks.clone(),
            events: self.events.clone(),
        }
    }

    /// Create the advisory lock directory for a service, as installing a
    /// workload would.
    pub fn lock_dir(&self, app_id: u32, service: &str) -> PathBuf {
        let dir = self
            .dir
            .path()
            .join("locks")
            .join("services")
            .join(app_id.to_string())
            .join(service);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Hold an advisory lock the way a co-resident workload does.
    pub fn hold_lock(&self, app_id: u32, service: &str) {
        let dir = self.lock_dir(app_id, service);
        std::fs::write(dir.join("updates.lock"), b"").unwrap();
    }
}

/// A service record as target instantiation produces it.
pub(crate) fn service(app_id: u32, name: &str, image: &str) -> Service {
    Service {
        app_id,
        service_name: name.to_string(),
        service_id: Some(640_681),
        release_id: Some(100),
        image: image.to_string(),
        image_id: Some(7),
        container_id: None,
        status: ServiceStatus::Running,
        environment: BTreeMap::new(),
        labels: BTreeMap::new(),
        running: true,
        update_strategy: UpdateStrategy::Recreate,
        composition: BTreeMap::new(),
        created_at: None,
    }
}

/// Raw target JSON for one app with one `main` service.
pub(crate) fn one_service_target(app_id: u32, commit: &str, image: &str) -> serde_json::Value {
    serde_json::json!({
        "local": {
            "name": "device-under-test",
            "config": {},
            "apps": {
                app_id.to_string(): {
                    "name": "myapp",
                    "commit": commit,
                    "releaseId": 100,
                    "services": {
                        "main": {
                            "serviceId": 640681,
                            "imageId": 7,
                            "image": image,
                        }
                    }
                }
            }
        },
        "dependent": {}
    })
}
