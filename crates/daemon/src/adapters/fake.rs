// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recorded-call fakes for the runtime and host adapters.
//!
//! The fake runtime keeps containers, images, networks and volumes in
//! memory, shaped exactly like the Docker adapter's view (identity in
//! labels), so the manager's join logic runs unchanged against it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use steward_core::{Network, Service, Volume};
use tokio::sync::mpsc;

use super::{
    resource_labels, service_labels, ContainerDetail, ContainerInfo, ContainerRuntime,
    HostPrimitive, ImageInfo, NetworkInfo, PullProgress, RuntimeError, RuntimeEvent, VolumeInfo,
};

/// One recorded runtime call, by service/resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create(String),
    Start(String),
    Stop(String),
    Kill(String),
    Remove(String),
    Rename(String, String),
    Pull(String),
    CreateNetwork(String),
    RemoveNetwork(String),
    CreateVolume(String),
    RemoveVolume(String),
}

struct FakeContainer {
    id: String,
    name: String,
    service: Service,
    state: String,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    images: Vec<ImageInfo>,
    networks: Vec<Network>,
    volumes: Vec<Volume>,
    calls: Vec<RuntimeCall>,
    /// Operation name -> error message; matching operations fail.
    failures: BTreeMap<String, String>,
    next_id: u32,
    event_tx: Option<mpsc::Sender<RuntimeEvent>>,
    /// Epoch ms assigned to the next created container.
    now_ms: u64,
}

#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container for `service`, bypassing the call log.
    pub fn seed_service(&self, service: &Service, running: bool) -> String {
        let mut state = self.inner.lock();
        state.next_id += 1;
        state.now_ms += 1;
        let id = format!("ctr-{}", state.next_id);
        let mut service = service.clone();
        service.container_id = Some(id.clone());
        if service.created_at.is_none() {
            service.created_at = Some(state.now_ms);
        }
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: service.container_name(),
            service,
            state: if running { "running".into() } else { "exited".into() },
        });
        id
    }

    /// Seed a locally available image.
    pub fn seed_image(&self, reference: &str) {
        let mut state = self.inner.lock();
        let id = format!("sha256:seed-{}", state.images.len());
        state.images.push(ImageInfo { id, tags: vec![reference.to_string()] });
    }

    pub fn seed_network(&self, network: &Network) {
        self.inner.lock().networks.push(network.clone());
    }

    pub fn seed_volume(&self, volume: &Volume) {
        self.inner.lock().volumes.push(volume.clone());
    }

    /// Make every call of `op` (an action name from [`RuntimeCall`], lower
    /// case) fail with `message`.
    pub fn fail_on(&self, op: &str, message: &str) {
        self.inner.lock().failures.insert(op.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Flip a container's state behind the supervisor's back, simulating
    /// drift (a crashed or externally stopped container).
    pub fn force_state(&self, service_name: &str, state: &str) {
        let mut inner = self.inner.lock();
        if let Some(c) =
            inner.containers.iter_mut().find(|c| c.service.service_name == service_name)
        {
            c.state = state.to_string();
        }
    }

    /// Container state by service name, if the container exists.
    pub fn container_state(&self, service_name: &str) -> Option<String> {
        self.inner
            .lock()
            .containers
            .iter()
            .find(|c| c.service.service_name == service_name)
            .map(|c| c.state.clone())
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().containers.len()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.inner.lock().volumes.iter().map(|v| v.scoped_name()).collect()
    }

    /// Emit a runtime event to the subscriber, if any.
    pub fn push_event(&self, action: &str, container_id: Option<&str>) {
        let tx = self.inner.lock().event_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(RuntimeEvent {
                action: action.to_string(),
                container_id: container_id.map(String::from),
            });
        }
    }

    fn check(&self, op: &str) -> Result<(), RuntimeError> {
        if let Some(msg) = self.inner.lock().failures.get(op) {
            return Err(RuntimeError::Request(msg.clone()));
        }
        Ok(())
    }

    fn record(&self, call: RuntimeCall) {
        self.inner.lock().calls.push(call);
    }

    fn with_container<T>(
        &self,
        container_id: &str,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> Result<T, RuntimeError> {
        let mut state = self.inner.lock();
        state
            .containers
            .iter_mut()
            .find(|c| c.id == container_id)
            .map(f)
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        self.check("list")?;
        let state = self.inner.lock();
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerInfo {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.service.image.clone(),
                labels: service_labels(&c.service),
                state: c.state.clone(),
                created_at: c.service.created_at,
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, RuntimeError> {
        self.check("list")?;
        Ok(self.inner.lock().images.clone())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerDetail, RuntimeError> {
        self.check("inspect")?;
        self.with_container(container_id, |c| ContainerDetail {
            id: c.id.clone(),
            name: c.name.clone(),
            image: c.service.image.clone(),
            environment: c.service.environment.clone(),
            labels: service_labels(&c.service),
            state: c.state.clone(),
            created_at: c.service.created_at,
        })
    }

    async fn create(&self, service: &Service) -> Result<String, RuntimeError> {
        self.check("create")?;
        self.record(RuntimeCall::Create(service.service_name.clone()));
        let mut state = self.inner.lock();
        state.next_id += 1;
        state.now_ms += 1;
        let id = format!("ctr-{}", state.next_id);
        let mut service = service.clone();
        service.container_id = Some(id.clone());
        service.created_at = Some(state.now_ms);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: service.container_name(),
            service,
            state: "created".into(),
        });
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.check("start")?;
        let name = self.with_container(container_id, |c| {
            c.state = "running".into();
            c.service.service_name.clone()
        })?;
        self.record(RuntimeCall::Start(name));
        Ok(())
    }

    async fn stop(&self, container_id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.check("stop")?;
        let name = self.with_container(container_id, |c| {
            c.state = "exited".into();
            c.service.service_name.clone()
        })?;
        self.record(RuntimeCall::Stop(name));
        Ok(())
    }

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.check("kill")?;
        let name = self.with_container(container_id, |c| {
            c.state = "exited".into();
            c.service.service_name.clone()
        })?;
        self.record(RuntimeCall::Kill(name));
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.check("remove")?;
        let mut state = self.inner.lock();
        let Some(pos) = state.containers.iter().position(|c| c.id == container_id) else {
            return Err(RuntimeError::NotFound(container_id.to_string()));
        };
        let removed = state.containers.remove(pos);
        state.calls.push(RuntimeCall::Remove(removed.service.service_name));
        Ok(())
    }

    async fn rename(&self, container_id: &str, name: &str) -> Result<(), RuntimeError> {
        self.check("rename")?;
        let service_name = self.with_container(container_id, |c| {
            c.name = name.to_string();
            c.service.service_name.clone()
        })?;
        self.record(RuntimeCall::Rename(service_name, name.to_string()));
        Ok(())
    }

    async fn pull_image(
        &self,
        name: &str,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<String, RuntimeError> {
        self.check("pull")?;
        self.record(RuntimeCall::Pull(name.to_string()));
        let _ = progress.try_send(PullProgress { percentage: 50 });
        let _ = progress.try_send(PullProgress { percentage: 100 });
        let mut state = self.inner.lock();
        let id = format!("sha256:pulled-{}", state.images.len());
        state.images.push(ImageInfo { id: id.clone(), tags: vec![name.to_string()] });
        Ok(id)
    }

    async fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>, RuntimeError> {
        let (tx, rx) = mpsc::channel(32);
        self.inner.lock().event_tx = Some(tx);
        Ok(rx)
    }

    async fn create_network(&self, network: &Network) -> Result<(), RuntimeError> {
        self.check("create_network")?;
        self.record(RuntimeCall::CreateNetwork(network.scoped_name()));
        self.inner.lock().networks.push(network.clone());
        Ok(())
    }

    async fn remove_network(&self, network: &Network) -> Result<(), RuntimeError> {
        self.check("remove_network")?;
        self.record(RuntimeCall::RemoveNetwork(network.scoped_name()));
        let mut state = self.inner.lock();
        state.networks.retain(|n| n.scoped_name() != network.scoped_name());
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkInfo>, RuntimeError> {
        self.check("list")?;
        Ok(self
            .inner
            .lock()
            .networks
            .iter()
            .map(|n| NetworkInfo {
                name: n.scoped_name(),
                labels: resource_labels(n.app_id, &n.config),
            })
            .collect())
    }

    async fn create_volume(&self, volume: &Volume) -> Result<(), RuntimeError> {
        self.check("create_volume")?;
        self.record(RuntimeCall::CreateVolume(volume.scoped_name()));
        self.inner.lock().volumes.push(volume.clone());
        Ok(())
    }

    async fn remove_volume(&self, volume: &Volume) -> Result<(), RuntimeError> {
        self.check("remove_volume")?;
        self.record(RuntimeCall::RemoveVolume(volume.scoped_name()));
        let mut state = self.inner.lock();
        state.volumes.retain(|v| v.scoped_name() != volume.scoped_name());
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        self.check("list")?;
        Ok(self
            .inner
            .lock()
            .volumes
            .iter()
            .map(|v| VolumeInfo {
                name: v.scoped_name(),
                labels: resource_labels(v.app_id, &v.config),
            })
            .collect())
    }
}

/// Host primitive that records calls instead of touching the machine.
#[derive(Clone, Default)]
pub struct FakeHost {
    inner: Arc<Mutex<FakeHostState>>,
}

#[derive(Default)]
struct FakeHostState {
    reboots: u32,
    shutdowns: u32,
    blink_starts: u32,
    blink_stops: u32,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reboots(&self) -> u32 {
        self.inner.lock().reboots
    }

    pub fn shutdowns(&self) -> u32 {
        self.inner.lock().shutdowns
    }

    pub fn blink_starts(&self) -> u32 {
        self.inner.lock().blink_starts
    }

    pub fn blink_stops(&self) -> u32 {
        self.inner.lock().blink_stops
    }
}

#[async_trait]
impl HostPrimitive for FakeHost {
    async fn reboot(&self) -> Result<(), RuntimeError> {
        self.inner.lock().reboots += 1;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.inner.lock().shutdowns += 1;
        Ok(())
    }

    async fn blink_start(&self) -> Result<(), RuntimeError> {
        self.inner.lock().blink_starts += 1;
        Ok(())
    }

    async fn blink_stop(&self) -> Result<(), RuntimeError> {
        self.inner.lock().blink_stops += 1;
        Ok(())
    }
}
