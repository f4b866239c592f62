// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spec harness: a daemon wired from fakes, plus a minimal HTTP client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use steward_core::{EventBus, KeyedLocks};
use steward_daemon::adapters::{EventReporter, FakeHost, FakeRuntime};
use steward_daemon::api::{ApiCtx, VpnState};
use steward_daemon::engine::{ApplyDeps, ApplyHandle, ApplyLoop, FetchGauge};
use steward_daemon::{AppManager, StepExecutor, UpdateLocks};
use steward_storage::{ConfigStore, KeyStore, TargetStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const APP: u32 = 1_658_654;
pub const OTHER_APP: u32 = 222_222;
pub const IMG: &str = "registry2.example.com/v2/deadbeef";

pub struct Spec {
    pub dir: tempfile::TempDir,
    pub runtime: FakeRuntime,
    pub host: FakeHost,
    pub target: Arc<TargetStore>,
    pub config: Arc<ConfigStore>,
    pub keys: Arc<KeyStore>,
    pub events: EventBus,
    pub apply: ApplyHandle,
    pub addr: SocketAddr,
}

impl Spec {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let locks = KeyedLocks::new();
        let events = EventBus::new();
        let runtime = FakeRuntime::new();
        let host = FakeHost::new();

        let target = Arc::new(
            TargetStore::open(dir.path().join("target.json"), locks.clone(), events.clone())
                .expect("target store"),
        );
        let config =
            Arc::new(ConfigStore::open(dir.path().join("config.json")).expect("config store"));
        let keys = Arc::new(KeyStore::open(dir.path().join("keys.json")).expect("key store"));
        let update_locks = Arc::new(UpdateLocks::new(
            dir.path().join("locks"),
            dir.path().join("legacy-locks"),
            locks.clone(),
        ));

        let gauge = FetchGauge::new();
        let runtime_arc: Arc<dyn steward_daemon::ContainerRuntime> = Arc::new(runtime.clone());
        let manager = AppManager::new(Arc::clone(&runtime_arc), Arc::clone(&target));
        let reporter = Arc::new(EventReporter(events.clone()));
        let executor = StepExecutor::new(
            runtime_arc,
            update_locks,
            locks.clone(),
            Arc::clone(&config),
            events.clone(),
            reporter.clone(),
            manager.downloads_handle(),
            gauge.clone(),
        );
        let apply = ApplyLoop::new(
            ApplyDeps {
                manager: manager.clone(),
                executor: executor.clone(),
                target: Arc::clone(&target),
                config: Arc::clone(&config),
                locks: locks.clone(),
                events: events.clone(),
            },
            gauge,
        )
        .spawn();

        // Target writes wake the loop, as in the daemon binary
        {
            let apply = apply.clone();
            let mut changed = events.subscribe_target_state_changed();
            tokio::spawn(async move {
                while changed.recv().await.is_ok() {
                    apply.trigger(false, Duration::ZERO, false);
                }
            });
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let ctx = Arc::new(ApiCtx {
            manager,
            executor,
            apply: apply.clone(),
            target: Arc::clone(&target),
            config: Arc::clone(&config),
            keys: Arc::clone(&keys),
            host: Arc::new(host.clone()),
            reporter,
            events: events.clone(),
            locks: locks.clone(),
            vpn: Arc::new(parking_lot::Mutex::new(VpnState::default())),
        });
        tokio::spawn(steward_daemon::serve(ctx, listener));

        Self { dir, runtime, host, target, config, keys, events, apply, addr }
    }

    /// A cloud-scope key for requests that need full access.
    pub fn cloud_key(&self) -> String {
        self.keys.generate_cloud_key().expect("cloud key")
    }

    pub fn scoped_key(&self, app_id: u32) -> String {
        self.keys.generate_scoped_key(app_id, 640_681).expect("scoped key")
    }

    /// Hold an advisory lock the way a co-resident workload does.
    pub fn hold_lock(&self, app_id: u32, service: &str) {
        let dir = self
            .dir
            .path()
            .join("locks")
            .join("services")
            .join(app_id.to_string())
            .join(service);
        std::fs::create_dir_all(&dir).expect("lock dir");
        std::fs::write(dir.join("updates.lock"), b"").expect("lock file");
    }

    pub fn lock_path(&self, app_id: u32, service: &str) -> PathBuf {
        self.dir
            .path()
            .join("locks")
            .join("services")
            .join(app_id.to_string())
            .join(service)
            .join("updates.lock")
    }

    pub async fn get(&self, path: &str, key: Option<&str>) -> (u16, String) {
        self.request("GET", path, None, key).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
        key: Option<&str>,
    ) -> (u16, String) {
        self.request("POST", path, body, key).await
    }

    /// Send one HTTP/1.1 request and read the response with Content-Length
    /// framing.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        key: Option<&str>,
    ) -> (u16, String) {
        let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
        if let Some(key) = key {
            request.push_str(&format!("Authorization: Bearer {key}\r\n"));
        }
        match body {
            Some(body) => {
                let body = body.to_string();
                request.push_str(&format!(
                    "Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                ));
            }
            None => request.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n"),
        }

        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        stream.write_all(request.as_bytes()).await.expect("write");

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.expect("read");
        let text = String::from_utf8_lossy(&raw);
        let mut parts = text.splitn(2, "\r\n\r\n");
        let head = parts.next().unwrap_or_default();
        let body = parts.next().unwrap_or_default().to_string();
        let status = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        (status, body)
    }

    /// Install a target and wait until the apply loop converges on it.
    /// Subscribes before writing, so no completion event can be missed.
    pub async fn converge_target(&self, raw: serde_json::Value) {
        let mut apply_end = self.events.subscribe_apply_end();
        self.target.set_target_raw(&raw).await.expect("set target");
        loop {
            let outcome = tokio::time::timeout(Duration::from_secs(30), apply_end.recv())
                .await
                .expect("timed out waiting for apply to converge")
                .expect("event channel closed");
            if outcome.is_none() {
                return;
            }
        }
    }

    /// Poll until `probe` holds; avoids racing on broadcast subscriptions.
    pub async fn wait_until(&self, what: &str, probe: impl Fn() -> bool) {
        for _ in 0..600 {
            if probe() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {what}");
    }
}

/// Target JSON for one app with a single `main` service.
pub fn one_service_target(app_id: u32, commit: &str) -> serde_json::Value {
    serde_json::json!({
        "local": {
            "name": "spec-device",
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
                            "image": IMG,
                        }
                    }
                }
            }
        },
        "dependent": {}
    })
}

/// A current-side service record for seeding the fake runtime.
pub fn main_service(app_id: u32) -> steward_core::Service {
    steward_core::Service {
        app_id,
        service_name: "main".into(),
        service_id: Some(640_681),
        release_id: Some(100),
        image: IMG.into(),
        image_id: Some(7),
        container_id: None,
        status: steward_core::ServiceStatus::Running,
        environment: Default::default(),
        labels: Default::default(),
        running: true,
        update_strategy: Default::default(),
        composition: Default::default(),
        created_at: None,
    }
}
