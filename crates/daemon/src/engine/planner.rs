// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step planner.
//!
//! A pure function from (current, target, images, overlay, device diff) to
//! the ordered steps of one apply cycle. Device-config steps preempt app
//! steps; apps are processed in ascending id order and services in target
//! declaration order; prerequisites come before dependents (volumes and
//! networks before services, fetch before start, stop before remove).
//! A converged system plans to an empty list.

use std::collections::{BTreeMap, BTreeSet};

use steward_core::{App, Image, ImageStatus, Service, Step, UpdateStrategy, VolatileOverlay};

use crate::adapters::ImageInfo;

pub struct PlanInput<'a> {
    pub current: &'a [App],
    pub target: &'a [App],
    /// Images available in the runtime.
    pub images: &'a [ImageInfo],
    pub volatile: &'a VolatileOverlay,
    /// Target device-config entries that differ from the applied ones.
    pub device_diff: &'a BTreeMap<String, String>,
}

/// Plan one apply cycle. Empty result means converged.
pub fn plan(input: &PlanInput<'_>) -> Vec<Step> {
    // Host-level settings must precede app changes; app steps wait.
    if !input.device_diff.is_empty() {
        return vec![Step::SetConfig { changes: input.device_diff.clone() }];
    }

    let current: BTreeMap<u32, &App> = input.current.iter().map(|a| (a.app_id, a)).collect();
    let target: BTreeMap<u32, &App> = input.target.iter().map(|a| (a.app_id, a)).collect();
    let app_ids: BTreeSet<u32> = current.keys().chain(target.keys()).copied().collect();

    let mut steps = Vec::new();
    for app_id in app_ids {
        plan_app(
            input,
            current.get(&app_id).copied(),
            target.get(&app_id).copied(),
            &mut steps,
        );
    }

    if steps.iter().all(Step::is_noop) {
        return Vec::new();
    }
    steps.retain(|s| !s.is_noop());
    steps
}

fn plan_app(input: &PlanInput<'_>, current: Option<&App>, target: Option<&App>, steps: &mut Vec<Step>) {
    let no_services = Vec::new();
    let no_networks = Vec::new();
    let no_volumes = Vec::new();

    let cur_services = current.map(|a| &a.services).unwrap_or(&no_services);
    let tgt_services = target.map(|a| &a.services).unwrap_or(&no_services);
    let cur_networks = current.map(|a| &a.networks).unwrap_or(&no_networks);
    let tgt_networks = target.map(|a| &a.networks).unwrap_or(&no_networks);
    let cur_volumes = current.map(|a| &a.volumes).unwrap_or(&no_volumes);
    let tgt_volumes = target.map(|a| &a.volumes).unwrap_or(&no_volumes);

    // Volumes and networks first: services mount them.
    for volume in tgt_volumes.iter() {
        if !cur_volumes.iter().any(|v| v.name == volume.name) {
            steps.push(Step::CreateVolume { volume: volume.clone() });
        }
    }
    for network in tgt_networks.iter() {
        if !cur_networks.iter().any(|n| n.name == network.name) {
            steps.push(Step::CreateNetwork { network: network.clone() });
        }
    }

    // Duplicate containers for one service name: keep the newest, kill the
    // rest. The survivors are the current side of the service diff.
    let (representatives, duplicates) = dedupe_services(cur_services);
    for dup in duplicates {
        steps.push(Step::Kill { service: dup.clone() });
        steps.push(Step::Remove { service: dup.clone() });
    }

    // Services in target declaration order.
    for tgt in tgt_services.iter() {
        let cur = representatives.get(tgt.service_name.as_str()).copied();
        plan_service(input, cur, tgt, steps);
    }

    // Current-only services: stop, then remove.
    for (_, cur) in representatives {
        if !tgt_services.iter().any(|t| t.service_name == cur.service_name) {
            steps.push(Step::Stop { service: cur.clone() });
            steps.push(Step::Remove { service: cur.clone() });
        }
    }

    // Resource removals after the services that used them are gone.
    for network in cur_networks.iter() {
        if !tgt_networks.iter().any(|n| n.name == network.name) {
            steps.push(Step::RemoveNetwork { network: network.clone() });
        }
    }
    for volume in cur_volumes.iter() {
        if !tgt_volumes.iter().any(|v| v.name == volume.name)
            && !volume_referenced(input, &volume.name)
        {
            steps.push(Step::RemoveVolume { volume: volume.clone() });
        }
    }
}

/// A volume referenced by any target app is never removed.
fn volume_referenced(input: &PlanInput<'_>, name: &str) -> bool {
    input.target.iter().any(|app| app.volumes.iter().any(|v| v.name == name))
}

/// Split current services into one representative per name (newest by
/// creation time) and the duplicates slated for removal.
fn dedupe_services(services: &[Service]) -> (BTreeMap<&str, &Service>, Vec<&Service>) {
    let mut representatives: BTreeMap<&str, &Service> = BTreeMap::new();
    let mut duplicates = Vec::new();
    for service in services {
        let existing_created =
            representatives.get(service.service_name.as_str()).map(|s| s.created_at.unwrap_or(0));
        match existing_created {
            None => {
                representatives.insert(service.service_name.as_str(), service);
            }
            Some(created) if service.created_at.unwrap_or(0) > created => {
                if let Some(old) = representatives.insert(service.service_name.as_str(), service) {
                    duplicates.push(old);
                }
            }
            Some(_) => duplicates.push(service),
        }
    }
    (representatives, duplicates)
}

fn plan_service(
    input: &PlanInput<'_>,
    current: Option<&Service>,
    target: &Service,
    steps: &mut Vec<Step>,
) {
    let effective_running = input
        .volatile
        .running(target.app_id, &target.service_name)
        .unwrap_or(target.running);

    let Some(current) = current else {
        // Target-only: fetch the image if missing, else start.
        if !image_available(input, target) {
            steps.push(fetch_step(target));
        } else if effective_running {
            steps.push(Step::Start { target: target.clone() });
        } else {
            steps.push(Step::Noop);
        }
        return;
    };

    if !current.same_config(target) {
        // Recreate path; the replacement image must be present first.
        if !image_available(input, target) {
            steps.push(fetch_step(target));
            return;
        }
        if target.update_strategy == UpdateStrategy::HandOver {
            steps.push(Step::Handover { current: current.clone(), target: target.clone() });
        } else {
            steps.push(Step::Kill { service: current.clone() });
            steps.push(Step::Remove { service: current.clone() });
            steps.push(Step::Start { target: target.clone() });
        }
        return;
    }

    if current.only_metadata_differs(target) {
        steps.push(Step::UpdateMetadata { current: current.clone(), target: target.clone() });
        return;
    }

    match (current.is_running(), effective_running) {
        (true, true) | (false, false) => steps.push(Step::Noop),
        (true, false) => steps.push(Step::Stop { service: current.clone() }),
        (false, true) => {
            // Reuse the existing stopped container.
            let mut target = target.clone();
            target.container_id = current.container_id.clone();
            steps.push(Step::Start { target });
        }
    }
}

fn image_available(input: &PlanInput<'_>, service: &Service) -> bool {
    input.images.iter().any(|i| i.tags.iter().any(|t| t == &service.image))
}

fn fetch_step(service: &Service) -> Step {
    Step::Fetch {
        image: Image {
            image_id: service.image_id.unwrap_or(0),
            name: service.image.clone(),
            app_id: service.app_id,
            service_name: service.service_name.clone(),
            release_id: service.release_id,
            docker_image_id: None,
            status: ImageStatus::Downloading,
            download_progress: None,
        },
    }
}

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;
