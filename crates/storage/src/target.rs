// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target-state store.
//!
//! Holds the durable target document together with the per-app commits map
//! (the commit reported to status readers is the last *fully applied*
//! release, never an in-progress one), plus two volatile pieces: the
//! intermediate target installed during phased transitions and the per-
//! service running overlay set by the Control API.
//!
//! Writes take the shared `"target"` writer lock; reads take the reader
//! lock. Everything under one mutex persists in one transaction.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use steward_core::{
    EventBus, KeyedLocks, SupervisorError, TargetApp, TargetState, VolatileOverlay,
};

use crate::persist::{read_json, write_json, StoreError};

/// The persisted document: target plus commits, one file, one transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredTarget {
    target: TargetState,
    #[serde(default)]
    commits: BTreeMap<u32, String>,
}

struct Inner {
    doc: StoredTarget,
    intermediate: Option<TargetState>,
    volatile: VolatileOverlay,
}

pub struct TargetStore {
    path: PathBuf,
    locks: KeyedLocks,
    events: EventBus,
    inner: Mutex<Inner>,
}

impl TargetStore {
    /// Load the store, starting empty when no document exists yet.
    pub fn open(
        path: impl Into<PathBuf>,
        locks: KeyedLocks,
        events: EventBus,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = read_json::<StoredTarget>(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            locks,
            events,
            inner: Mutex::new(Inner {
                doc,
                intermediate: None,
                volatile: VolatileOverlay::default(),
            }),
        })
    }

    /// Validate and persist a raw target document.
    pub async fn set_target_raw(&self, raw: &serde_json::Value) -> Result<(), SupervisorError> {
        let target = TargetState::parse(raw)?;
        self.set_target(target).await
    }

    /// Persist the full target for all apps, device config and dependent
    /// state in one transaction. Clears the volatile overlay for every app
    /// whose target changed, then emits `target_state_changed`.
    pub async fn set_target(&self, target: TargetState) -> Result<(), SupervisorError> {
        let _guard = self.locks.write("target").await;
        {
            let mut inner = self.inner.lock();

            let old_apps = &inner.doc.target.local.apps;
            let mut changed: Vec<u32> = Vec::new();
            for (app_id, app) in &target.local.apps {
                if old_apps.get(app_id) != Some(app) {
                    changed.push(*app_id);
                }
            }
            // Apps dropped from the target also lose their overlay
            for app_id in old_apps.keys() {
                if !target.local.apps.contains_key(app_id) {
                    changed.push(*app_id);
                }
            }
            for app_id in changed {
                inner.volatile.clear_app(app_id);
            }

            inner.doc.target = target;
            write_json(&self.path, &inner.doc)
                .map_err(|e| SupervisorError::Inconsistency(format!("target persist: {e}")))?;
        }
        self.events.publish_target_state_changed();
        Ok(())
    }

    /// The instantiated target; with `intermediate`, the currently installed
    /// intermediate target instead (used by phased applies).
    pub async fn get_target(&self, intermediate: bool) -> TargetState {
        let _guard = self.locks.read("target").await;
        let inner = self.inner.lock();
        if intermediate {
            if let Some(t) = &inner.intermediate {
                return t.clone();
            }
        }
        inner.doc.target.clone()
    }

    pub fn get_target_app(&self, app_id: u32) -> Option<TargetApp> {
        self.inner.lock().doc.target.app(app_id).cloned()
    }

    /// Install or clear the intermediate target. Not persisted: an
    /// interrupted phased transition falls back to the real target.
    pub fn set_intermediate(&self, target: Option<TargetState>) {
        self.inner.lock().intermediate = target;
    }

    pub fn has_intermediate(&self) -> bool {
        self.inner.lock().intermediate.is_some()
    }

    pub fn get_commit_for_app(&self, app_id: u32) -> Option<String> {
        self.inner.lock().doc.commits.get(&app_id).cloned()
    }

    /// Record a fully-applied release.
    pub fn set_commit_for_app(&self, app_id: u32, commit: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.doc.commits.insert(app_id, commit.to_string());
        write_json(&self.path, &inner.doc)
    }

    pub fn set_volatile_running(&self, app_id: u32, service_name: &str, running: bool) {
        self.inner.lock().volatile.set_running(app_id, service_name, running);
    }

    pub fn volatile(&self) -> VolatileOverlay {
        self.inner.lock().volatile.clone()
    }

    /// The device config the target declares.
    pub fn target_device_config(&self) -> BTreeMap<String, String> {
        self.inner.lock().doc.target.local.config.clone()
    }
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;
