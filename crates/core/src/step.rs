// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition steps: single atomic actions on one service, network, volume,
//! image or the device config, produced by the planner and consumed by the
//! executor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::app::Service;
use crate::image::Image;
use crate::resource::{Network, Volume};

/// One step of an apply cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
    /// Pull an image the target needs.
    Fetch { image: Image },
    /// Kill a running container (recreate path, duplicate cleanup).
    Kill { service: Service },
    /// Remove a stopped container.
    Remove { service: Service },
    /// Create and start the target service's container.
    Start { target: Service },
    /// Rename the container to the target's release bookkeeping; no restart.
    UpdateMetadata { current: Service, target: Service },
    /// Start the replacement, quiesce, then stop the old container.
    Handover { current: Service, target: Service },
    /// Stop then recreate and start (Control API).
    Restart { current: Service, target: Service },
    /// Stop a container, keeping it around.
    Stop { service: Service },
    /// Remove an app's containers and volumes, then re-apply.
    Purge { app_id: u32 },
    CreateNetwork { network: Network },
    RemoveNetwork { network: Network },
    CreateVolume { volume: Volume },
    RemoveVolume { volume: Volume },
    /// Apply host-level settings; always planned before any app step.
    SetConfig { changes: BTreeMap<String, String> },
    Noop,
}

impl Step {
    /// Wire name of the action, as reported on step channels and in logs.
    pub fn action(&self) -> &'static str {
        match self {
            Step::Fetch { .. } => "fetch",
            Step::Kill { .. } => "kill",
            Step::Remove { .. } => "remove",
            Step::Start { .. } => "start",
            Step::UpdateMetadata { .. } => "updateMetadata",
            Step::Handover { .. } => "handover",
            Step::Restart { .. } => "restart",
            Step::Stop { .. } => "stop",
            Step::Purge { .. } => "purge",
            Step::CreateNetwork { .. } => "createNetwork",
            Step::RemoveNetwork { .. } => "removeNetwork",
            Step::CreateVolume { .. } => "createVolume",
            Step::RemoveVolume { .. } => "removeVolume",
            Step::SetConfig { .. } => "setConfig",
            Step::Noop => "noop",
        }
    }

    /// The app this step touches, if any. Steps sharing an app id are
    /// serialized by the executor; `SetConfig` and `Noop` have none.
    pub fn app_id(&self) -> Option<u32> {
        match self {
            Step::Fetch { image } => Some(image.app_id),
            Step::Kill { service }
            | Step::Remove { service }
            | Step::Stop { service } => Some(service.app_id),
            Step::Start { target } => Some(target.app_id),
            Step::UpdateMetadata { target, .. }
            | Step::Handover { target, .. }
            | Step::Restart { target, .. } => Some(target.app_id),
            Step::Purge { app_id } => Some(*app_id),
            Step::CreateNetwork { network } | Step::RemoveNetwork { network } => {
                Some(network.app_id)
            }
            Step::CreateVolume { volume } | Step::RemoveVolume { volume } => Some(volume.app_id),
            Step::SetConfig { .. } | Step::Noop => None,
        }
    }

    /// The service this step concerns, for step reports.
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Step::Fetch { image } => Some(&image.service_name),
            Step::Kill { service } | Step::Remove { service } | Step::Stop { service } => {
                Some(&service.service_name)
            }
            Step::Start { target }
            | Step::UpdateMetadata { target, .. }
            | Step::Handover { target, .. }
            | Step::Restart { target, .. } => Some(&target.service_name),
            _ => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Step::Noop)
    }

    /// Whether this step runs without taking the per-service advisory locks.
    ///
    /// `start` never takes them: a workload holding an update lock blocks
    /// updates, and starting what the target already declares is not one.
    pub fn bypasses_update_lock(&self) -> bool {
        matches!(
            self,
            Step::Fetch { .. }
                | Step::UpdateMetadata { .. }
                | Step::Start { .. }
                | Step::SetConfig { .. }
                | Step::Noop
        )
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
