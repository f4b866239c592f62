// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device configuration store.
//!
//! Persisted key/value settings the supervisor consumes (`lockOverride`,
//! `localMode`, poll interval, endpoint, listen port) plus the host-level
//! settings currently applied on the device. Mutations broadcast a change
//! notification.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::persist::{read_json, write_json, StoreError};

const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;
const DEFAULT_LISTEN_PORT: u16 = 48_484;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDoc {
    #[serde(rename = "lockOverride")]
    pub lock_override: bool,
    #[serde(rename = "localMode")]
    pub local_mode: bool,
    #[serde(rename = "appUpdatePollInterval")]
    pub app_update_poll_interval_ms: u64,
    #[serde(rename = "apiEndpoint")]
    pub api_endpoint: Option<String>,
    #[serde(rename = "listenPort")]
    pub listen_port: u16,
    /// Host-level settings currently applied (target comes from the target
    /// state's `local.config`).
    #[serde(rename = "deviceConfig")]
    pub device_config: BTreeMap<String, String>,
}

impl Default for ConfigDoc {
    fn default() -> Self {
        Self {
            lock_override: false,
            local_mode: false,
            app_update_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            api_endpoint: None,
            listen_port: DEFAULT_LISTEN_PORT,
            device_config: BTreeMap::new(),
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
    inner: Mutex<ConfigDoc>,
    changes: broadcast::Sender<()>,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = read_json::<ConfigDoc>(&path)?.unwrap_or_default();
        Ok(Self { path, inner: Mutex::new(doc), changes: broadcast::channel(16).0 })
    }

    pub fn lock_override(&self) -> bool {
        self.inner.lock().lock_override
    }

    pub fn local_mode(&self) -> bool {
        self.inner.lock().local_mode
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.inner.lock().app_update_poll_interval_ms)
    }

    pub fn api_endpoint(&self) -> Option<String> {
        self.inner.lock().api_endpoint.clone()
    }

    pub fn listen_port(&self) -> u16 {
        self.inner.lock().listen_port
    }

    pub fn device_config(&self) -> BTreeMap<String, String> {
        self.inner.lock().device_config.clone()
    }

    pub fn snapshot(&self) -> ConfigDoc {
        self.inner.lock().clone()
    }

    /// Apply a partial update and persist, notifying subscribers.
    pub fn update(&self, f: impl FnOnce(&mut ConfigDoc)) -> Result<(), StoreError> {
        {
            let mut doc = self.inner.lock();
            f(&mut doc);
            write_json(&self.path, &*doc)?;
        }
        let _ = self.changes.send(());
        Ok(())
    }

    /// Record host-level settings as applied.
    pub fn set_device_config(&self, changes: &BTreeMap<String, String>) -> Result<(), StoreError> {
        self.update(|doc| {
            for (k, v) in changes {
                doc.device_config.insert(k.clone(), v.clone());
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
