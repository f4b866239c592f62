// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step executor.
//!
//! Steps of one cycle run concurrently, except that steps touching the same
//! app are serialized on the in-process app lock. Steps that do not bypass
//! the advisory locks run inside the `lock(appId, {force}, thunk)`
//! combinator, which takes that same app lock itself. Per-step outcomes go
//! out on the `step-completed` / `step-error` channels.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use steward_core::{
    EventBus, Image, ImageStatus, KeyedLocks, Step, StepFailure, StepReport, SupervisorError,
};
use steward_storage::ConfigStore;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::adapters::{ContainerRuntime, PullProgress, StateReporter};
use crate::engine::FetchGauge;
use crate::lock::UpdateLocks;

/// Grace period for container stop before the runtime escalates.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// Time the old replica keeps serving after its handover replacement starts.
const HANDOVER_QUIESCE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOpts {
    pub force: bool,
    /// Bypass the per-app in-process lock and the advisory locks
    /// (intermediate applies).
    pub skip_lock: bool,
}

/// Aggregated results of one cycle's steps.
pub struct ExecSummary {
    pub executed: usize,
    pub errors: Vec<SupervisorError>,
}

impl ExecSummary {
    /// Collapse into a result; a non-lock error wins over `UpdatesLocked`
    /// so real failures are not misreported as lock contention.
    pub fn into_result(mut self) -> Result<usize, SupervisorError> {
        if self.errors.is_empty() {
            return Ok(self.executed);
        }
        let pos = self.errors.iter().position(|e| !e.is_updates_locked()).unwrap_or(0);
        Err(self.errors.swap_remove(pos))
    }
}

#[derive(Clone)]
pub struct StepExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    update_locks: Arc<UpdateLocks>,
    keyed: KeyedLocks,
    config: Arc<ConfigStore>,
    events: EventBus,
    reporter: Arc<dyn StateReporter>,
    downloads: Arc<Mutex<BTreeMap<u32, Image>>>,
    gauge: FetchGauge,
}

impl StepExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        update_locks: Arc<UpdateLocks>,
        keyed: KeyedLocks,
        config: Arc<ConfigStore>,
        events: EventBus,
        reporter: Arc<dyn StateReporter>,
        downloads: Arc<Mutex<BTreeMap<u32, Image>>>,
        gauge: FetchGauge,
    ) -> Self {
        Self { runtime, update_locks, keyed, config, events, reporter, downloads, gauge }
    }

    /// Execute all steps of one cycle. Groups sharing an app id run
    /// sequentially; groups run concurrently.
    pub async fn execute_all(&self, steps: Vec<Step>, opts: ExecOpts) -> ExecSummary {
        let mut groups: BTreeMap<Option<u32>, Vec<Step>> = BTreeMap::new();
        for step in steps {
            groups.entry(step.app_id()).or_default().push(step);
        }

        let tasks = groups.into_values().map(|group| {
            let executor = self.clone();
            async move {
                let mut results = Vec::with_capacity(group.len());
                for step in group {
                    let result = executor.execute(step, opts).await;
                    let failed = result.is_err();
                    results.push(result);
                    // Later steps of a group depend on earlier ones (stop
                    // before remove before start); don't run them on top of
                    // a failure.
                    if failed {
                        break;
                    }
                }
                results
            }
        });

        let mut summary = ExecSummary { executed: 0, errors: Vec::new() };
        for result in join_all(tasks).await.into_iter().flatten() {
            match result {
                Ok(()) => summary.executed += 1,
                Err(e) => summary.errors.push(e),
            }
        }
        summary
    }

    /// Execute one step under the full lock discipline (Control-API path).
    pub async fn execute_one(&self, step: Step, force: bool) -> Result<(), SupervisorError> {
        self.execute(step, ExecOpts { force, skip_lock: false }).await
    }

    async fn execute(&self, step: Step, opts: ExecOpts) -> Result<(), SupervisorError> {
        let report = StepReport {
            action: step.action(),
            app_id: step.app_id(),
            service_name: step.service_name().map(String::from),
        };
        let started = std::time::Instant::now();

        let result = self.execute_locked(&step, opts).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                info!(
                    action = report.action,
                    app_id = report.app_id,
                    service = report.service_name.as_deref().unwrap_or(""),
                    elapsed_ms,
                    "step completed"
                );
                self.events.publish_step_completed(report);
            }
            Err(e) => {
                if e.is_updates_locked() {
                    info!(action = report.action, app_id = report.app_id, "step blocked: {e}");
                } else {
                    error!(
                        action = report.action,
                        app_id = report.app_id,
                        error = %e,
                        elapsed_ms,
                        "step failed"
                    );
                }
                self.events.publish_step_error(StepFailure {
                    report,
                    error: e.to_string(),
                    updates_locked: e.is_updates_locked(),
                });
            }
        }
        result
    }

    async fn execute_locked(&self, step: &Step, opts: ExecOpts) -> Result<(), SupervisorError> {
        if opts.skip_lock {
            return self.run_step(step).await;
        }
        if step.bypasses_update_lock() {
            // Still serialized against other work on the same app; the
            // advisory-lock combinator takes this lock itself otherwise.
            let _guard = match step.app_id() {
                Some(app_id) => Some(self.keyed.write(&app_id.to_string()).await),
                None => None,
            };
            return self.run_step(step).await;
        }
        let force = opts.force || self.config.lock_override();
        self.update_locks.lock(step.app_id(), force, || self.run_step(step)).await
    }

    async fn run_step(&self, step: &Step) -> Result<(), SupervisorError> {
        match step {
            Step::Fetch { image } => self.fetch(image).await,
            Step::Start { target } => {
                match &target.container_id {
                    Some(id) => self.runtime.start(id).await?,
                    None => {
                        let id = self.runtime.create(target).await?;
                        self.runtime.start(&id).await?;
                    }
                }
                Ok(())
            }
            Step::Stop { service } => {
                if let Some(id) = &service.container_id {
                    self.runtime.stop(id, STOP_TIMEOUT).await?;
                }
                Ok(())
            }
            Step::Kill { service } => {
                if let Some(id) = &service.container_id {
                    self.runtime.kill(id).await?;
                }
                Ok(())
            }
            Step::Remove { service } => {
                if let Some(id) = &service.container_id {
                    self.runtime.remove(id).await?;
                }
                Ok(())
            }
            Step::Restart { current, target } => {
                if let Some(id) = &current.container_id {
                    self.runtime.stop(id, STOP_TIMEOUT).await?;
                    self.runtime.remove(id).await?;
                }
                let id = self.runtime.create(target).await?;
                self.runtime.start(&id).await?;
                Ok(())
            }
            Step::Handover { current, target } => {
                let id = self.runtime.create(target).await?;
                self.runtime.start(&id).await?;
                // Let the replacement take over before the old replica goes.
                tokio::time::sleep(HANDOVER_QUIESCE).await;
                if let Some(old) = &current.container_id {
                    self.runtime.stop(old, STOP_TIMEOUT).await?;
                    self.runtime.remove(old).await?;
                }
                Ok(())
            }
            Step::UpdateMetadata { current, target } => {
                let id = current.container_id.as_ref().ok_or_else(|| {
                    SupervisorError::Inconsistency(format!(
                        "metadata update for uninstantiated service {}",
                        current.service_name
                    ))
                })?;
                self.runtime.rename(id, &target.container_name()).await?;
                Ok(())
            }
            Step::Purge { app_id } => self.purge(*app_id).await,
            Step::CreateNetwork { network } => Ok(self.runtime.create_network(network).await?),
            Step::RemoveNetwork { network } => Ok(self.runtime.remove_network(network).await?),
            Step::CreateVolume { volume } => Ok(self.runtime.create_volume(volume).await?),
            Step::RemoveVolume { volume } => Ok(self.runtime.remove_volume(volume).await?),
            Step::SetConfig { changes } => self
                .config
                .set_device_config(changes)
                .map_err(|e| SupervisorError::Inconsistency(format!("device config: {e}"))),
            Step::Noop => Ok(()),
        }
    }

    /// Pull the image, tracking progress in the shared download map and on
    /// the report channel.
    async fn fetch(&self, image: &Image) -> Result<(), SupervisorError> {
        let _in_flight = self.gauge.begin();
        self.downloads.lock().insert(
            image.image_id,
            Image {
                status: ImageStatus::Downloading,
                download_progress: Some(0),
                ..image.clone()
            },
        );

        let (tx, mut rx) = mpsc::channel::<PullProgress>(16);
        let downloads = Arc::clone(&self.downloads);
        let reporter = Arc::clone(&self.reporter);
        let image_id = image.image_id;
        let progress_task = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                if let Some(entry) = downloads.lock().get_mut(&image_id) {
                    entry.download_progress = Some(p.percentage);
                }
                reporter.report(serde_json::json!({
                    "download_progress": p.percentage,
                }));
            }
        });

        let result = self.runtime.pull_image(&image.name, tx).await;
        let _ = progress_task.await;

        match result {
            Ok(docker_image_id) => {
                if let Some(entry) = self.downloads.lock().get_mut(&image.image_id) {
                    entry.status = ImageStatus::Downloaded;
                    entry.download_progress = None;
                    entry.docker_image_id = Some(docker_image_id);
                }
                self.reporter.report(serde_json::json!({ "download_progress": null }));
                Ok(())
            }
            Err(e) => {
                self.downloads.lock().remove(&image.image_id);
                Err(e.into())
            }
        }
    }

    /// Remove every container and volume of the app. The caller re-applies
    /// the target afterwards to rebuild it.
    async fn purge(&self, app_id: u32) -> Result<(), SupervisorError> {
        for info in self.runtime.list_containers().await? {
            let Ok(detail) = self.runtime.inspect(&info.id).await else { continue };
            let Some(service) = crate::adapters::service_from_detail(&detail) else { continue };
            if service.app_id != app_id {
                continue;
            }
            self.runtime.stop(&info.id, STOP_TIMEOUT).await?;
            self.runtime.remove(&info.id).await?;
        }
        for info in self.runtime.list_volumes().await? {
            let Some(volume) = crate::adapters::volume_from_info(&info) else { continue };
            if volume.app_id != app_id {
                continue;
            }
            self.runtime.remove_volume(&volume).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
