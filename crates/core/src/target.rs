// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The declared target state document.
//!
//! This is the wire and disk format for "what should be running": a `local`
//! object holding the device name, device config and apps, plus an opaque
//! `dependent` object carried through untouched. [`TargetState::parse`]
//! validates the raw document before anything is persisted.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::app::{App, Service, ServiceStatus, UpdateStrategy};
use crate::error::SupervisorError;
use crate::resource::{Network, Volume};

/// Label carrying the update strategy on a service.
pub const STRATEGY_LABEL: &str = "io.steward.update-strategy";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetState {
    pub local: LocalTarget,
    #[serde(default)]
    pub dependent: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalTarget {
    #[serde(default)]
    pub name: String,
    /// Host-level settings applied before any app change.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Keyed by `appId`; keys serialize as strings in JSON.
    #[serde(default)]
    pub apps: BTreeMap<u32, TargetApp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetApp {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "releaseId", default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u32>,
    /// Keyed by service name; declaration order is semantic.
    #[serde(default)]
    pub services: IndexMap<String, TargetService>,
    #[serde(default)]
    pub networks: IndexMap<String, BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub volumes: IndexMap<String, BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetService {
    #[serde(rename = "serviceId", default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<u32>,
    #[serde(rename = "imageId", default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<u32>,
    pub image: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "default_running")]
    pub running: bool,
    /// Remaining compose config (ports, mounts, restart policy, ...).
    #[serde(flatten)]
    pub composition: BTreeMap<String, serde_json::Value>,
}

fn default_running() -> bool {
    true
}

impl TargetState {
    /// Validate and deserialize a raw target-state document.
    ///
    /// Rejections carry a human-readable message and leave no trace in any
    /// store; callers persist only a successfully parsed target.
    pub fn parse(raw: &serde_json::Value) -> Result<TargetState, SupervisorError> {
        let local = raw
            .get("local")
            .ok_or_else(|| SupervisorError::Validation("target state lacks a local object".into()))?;
        let apps = local
            .get("apps")
            .ok_or_else(|| SupervisorError::Validation("target state lacks local.apps".into()))?;
        if !apps.is_object() {
            return Err(SupervisorError::Validation("local.apps must be an object".into()));
        }
        if let Some(config) = local.get("config") {
            validate_string_map(config, "local.config")?;
        }
        for (app_id, app) in apps.as_object().into_iter().flatten() {
            if app_id.parse::<u32>().is_err() {
                return Err(SupervisorError::Validation(format!(
                    "app id {app_id} is not numeric"
                )));
            }
            for (name, svc) in
                app.get("services").and_then(|s| s.as_object()).into_iter().flatten()
            {
                if let Some(env) = svc.get("environment") {
                    validate_string_map(env, &format!("environment of service {name}"))?;
                }
            }
        }
        serde_json::from_value(raw.clone())
            .map_err(|e| SupervisorError::Validation(format!("malformed target state: {e}")))
    }

    pub fn app(&self, app_id: u32) -> Option<&TargetApp> {
        self.local.apps.get(&app_id)
    }

    /// Instantiate every target app into the working model, ascending app id.
    pub fn instantiate(&self) -> Vec<App> {
        self.local.apps.iter().map(|(id, app)| app.instantiate(*id)).collect()
    }
}

fn validate_string_map(value: &serde_json::Value, what: &str) -> Result<(), SupervisorError> {
    let Some(map) = value.as_object() else {
        return Err(SupervisorError::Validation(format!("{what} must be an object")));
    };
    for (k, v) in map {
        if !v.is_string() {
            return Err(SupervisorError::Validation(format!(
                "{what}: value of {k} must be a string"
            )));
        }
    }
    Ok(())
}

impl TargetApp {
    /// Build the instantiated [`App`] for this target.
    pub fn instantiate(&self, app_id: u32) -> App {
        let services = self
            .services
            .iter()
            .map(|(name, svc)| svc.instantiate(app_id, name, self.release_id))
            .collect();
        let networks = self
            .networks
            .iter()
            .map(|(name, config)| Network {
                app_id,
                name: name.clone(),
                config: config.clone(),
            })
            .collect();
        let volumes = self
            .volumes
            .iter()
            .map(|(name, config)| Volume {
                app_id,
                name: name.clone(),
                config: config.clone(),
            })
            .collect();
        App {
            app_id,
            name: self.name.clone(),
            commit: self.commit.clone(),
            source: self.source.clone(),
            release_id: self.release_id,
            services,
            networks,
            volumes,
        }
    }
}

impl TargetService {
    fn instantiate(&self, app_id: u32, name: &str, release_id: Option<u32>) -> Service {
        let update_strategy = self
            .labels
            .get(STRATEGY_LABEL)
            .map(|v| UpdateStrategy::from_label(v))
            .unwrap_or_default();
        Service {
            app_id,
            service_name: name.to_string(),
            service_id: self.service_id,
            release_id,
            image: self.image.clone(),
            image_id: self.image_id,
            container_id: None,
            status: if self.running { ServiceStatus::Running } else { ServiceStatus::Stopped },
            environment: self.environment.clone(),
            labels: self.labels.clone(),
            running: self.running,
            update_strategy,
            composition: self.composition.clone(),
            created_at: None,
        }
    }
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;
