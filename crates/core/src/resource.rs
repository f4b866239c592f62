// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Networks and volumes: opaque config maps keyed by `(app_id, name)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An application-scoped network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub app_id: u32,
    pub name: String,
    /// Opaque driver/ipam config, compared structurally.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl Network {
    /// Runtime-side name, namespaced per app.
    pub fn scoped_name(&self) -> String {
        format!("{}_{}", self.app_id, self.name)
    }

    pub fn same_config(&self, other: &Network) -> bool {
        self.config == other.config
    }
}

/// An application-scoped volume.
///
/// A volume referenced by any target app is never removed; removal requires
/// orphan status across all in-scope target apps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub app_id: u32,
    pub name: String,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl Volume {
    pub fn scoped_name(&self) -> String {
        format!("{}_{}", self.app_id, self.name)
    }

    pub fn same_config(&self, other: &Volume) -> bool {
        self.config == other.config
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
