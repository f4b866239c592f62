// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Apply loop: owns the reconcile cadence.
//!
//! A single actor task owns the apply state (`apply_in_progress`,
//! `shutting_down`, the scheduled-apply slot, the failure counter).
//! External components send trigger messages; nobody else reads or writes
//! the fields mid-flight. Cycles themselves run in a spawned task that
//! reports back on an internal channel, so triggers keep coalescing while
//! an apply is in progress.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use steward_core::{EventBus, KeyedLocks, Step, SupervisorError};
use steward_storage::{ConfigStore, TargetStore};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info};

use crate::engine::executor::{ExecOpts, StepExecutor};
use crate::engine::manager::AppManager;
use crate::engine::planner::{plan, PlanInput};
use crate::engine::FetchGauge;

/// Delay between cycles while convergence is still in progress.
const INTER_CYCLE_DELAY: Duration = Duration::from_millis(200);
/// Recheck cadence after an all-noop cycle; catches drift between poll ticks.
const CONVERGED_RECHECK_DELAY: Duration = Duration::from_secs(1);
/// Ceiling for the waiting-for-external-convergence backoff.
const MAX_CONVERGENCE_BACKOFF: Duration = Duration::from_secs(600);
/// Base of the failure backoff schedule.
const FAILURE_BACKOFF_BASE: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct ApplyDeps {
    pub manager: AppManager,
    pub executor: StepExecutor,
    pub target: Arc<TargetStore>,
    pub config: Arc<ConfigStore>,
    pub locks: KeyedLocks,
    pub events: EventBus,
}

/// Snapshot of the loop's externally visible state.
#[derive(Debug, Clone, Default)]
pub struct ApplyStatus {
    pub apply_in_progress: bool,
    pub failed_updates: u32,
    pub update_failed: bool,
    pub update_pending: bool,
    pub update_downloaded: bool,
    pub shutting_down: bool,
    pub last_apply_start: Option<Instant>,
    pub last_successful_update_ms: Option<u64>,
    /// Gauge reading at cycle start, to subtract fetch time from elapsed.
    fetch_baseline_ms: u64,
}

enum ApplyMsg {
    Trigger { force: bool, delay: Duration, from_api: bool },
    /// Phased apply of the installed intermediate target: skips the pause
    /// gate and the per-app locks.
    Intermediate,
}

#[derive(Clone)]
pub struct ApplyHandle {
    tx: mpsc::UnboundedSender<ApplyMsg>,
    status: Arc<Mutex<ApplyStatus>>,
    gauge: FetchGauge,
    config: Arc<ConfigStore>,
}

impl ApplyHandle {
    pub fn trigger(&self, force: bool, delay: Duration, from_api: bool) {
        let _ = self.tx.send(ApplyMsg::Trigger { force, delay, from_api });
    }

    pub fn trigger_intermediate(&self) {
        let _ = self.tx.send(ApplyMsg::Intermediate);
    }

    pub fn status(&self) -> ApplyStatus {
        self.status.lock().clone()
    }

    pub fn apply_in_progress(&self) -> bool {
        self.status.lock().apply_in_progress
    }

    /// Reboot/shutdown path: no further applies once set.
    pub fn mark_shutting_down(&self) {
        self.status.lock().shutting_down = true;
    }

    pub fn shutting_down(&self) -> bool {
        self.status.lock().shutting_down
    }

    /// Guards against stuck apply cycles. Healthy while idle, while fetches
    /// make progress, or while the current cycle's non-fetch time is under
    /// twice the poll interval.
    pub fn healthcheck(&self) -> bool {
        let status = self.status.lock();
        if !status.apply_in_progress || self.gauge.in_flight() > 0 {
            return true;
        }
        let Some(started) = status.last_apply_start else { return true };
        let fetched =
            Duration::from_millis(self.gauge.fetched_ms().saturating_sub(status.fetch_baseline_ms));
        started.elapsed().saturating_sub(fetched) < 2 * self.config.poll_interval()
    }
}

/// Run `thunk` while regular applies are gated out. Intermediate applies
/// ignore the gate.
pub async fn pausing_apply<T, F, Fut>(locks: &KeyedLocks, thunk: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let _blocker = locks.write("pause").await;
    thunk().await
}

enum CycleOutcome {
    /// Plan was empty: current matches target.
    Converged,
    Applied {
        /// At least one image fetch completed this cycle.
        downloaded: bool,
    },
    /// The cycle carried only device-config steps.
    DeviceConfig,
    /// Shutdown began while the cycle waited at the gate; nothing ran.
    Skipped,
}

pub struct ApplyLoop {
    deps: ApplyDeps,
    gauge: FetchGauge,
}

struct Pending {
    deadline: Instant,
    force: bool,
    intermediate: bool,
}

impl ApplyLoop {
    pub fn new(deps: ApplyDeps, gauge: FetchGauge) -> Self {
        Self { deps, gauge }
    }

    /// Spawn the actor task and return its handle.
    pub fn spawn(self) -> ApplyHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(ApplyStatus::default()));
        let handle = ApplyHandle {
            tx,
            status: Arc::clone(&status),
            gauge: self.gauge.clone(),
            config: Arc::clone(&self.deps.config),
        };
        tokio::spawn(run_loop(self.deps, self.gauge, rx, status));
        handle
    }
}

async fn run_loop(
    deps: ApplyDeps,
    gauge: FetchGauge,
    mut rx: mpsc::UnboundedReceiver<ApplyMsg>,
    status: Arc<Mutex<ApplyStatus>>,
) {
    let (done_tx, mut done_rx) =
        mpsc::channel::<Result<CycleOutcome, SupervisorError>>(1);
    let mut pending: Option<Pending> = None;
    let mut running = false;
    let mut scheduled: Option<(bool, Duration)> = None;
    // Backoff bookkeeping for device-config-only convergence waits
    let mut last_device_only = false;
    let mut device_streak: u32 = 0;

    loop {
        let deadline = pending
            .as_ref()
            .map(|p| p.deadline)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if status.lock().shutting_down {
                    continue;
                }
                match msg {
                    ApplyMsg::Trigger { force, delay, from_api } => {
                        if running {
                            let slot = scheduled.get_or_insert((false, Duration::ZERO));
                            slot.0 |= force;
                            slot.1 = slot.1.max(delay);
                        } else if let Some(p) = &mut pending {
                            p.force |= force;
                            if from_api {
                                // Cancel the pending delay, apply immediately
                                p.deadline = Instant::now();
                            }
                        } else {
                            pending = Some(Pending {
                                deadline: Instant::now() + delay,
                                force,
                                intermediate: false,
                            });
                        }
                    }
                    ApplyMsg::Intermediate => {
                        if running {
                            scheduled.get_or_insert((false, Duration::ZERO));
                        } else {
                            pending = Some(Pending {
                                deadline: Instant::now(),
                                force: false,
                                intermediate: true,
                            });
                        }
                    }
                }
            }

            _ = tokio::time::sleep_until(deadline), if pending.is_some() && !running => {
                let Some(p) = pending.take() else { continue };
                // Self-armed rechecks must also stop once shutdown begins
                if status.lock().shutting_down {
                    continue;
                }
                {
                    let mut st = status.lock();
                    st.apply_in_progress = true;
                    st.last_apply_start = Some(Instant::now());
                    st.fetch_baseline_ms = gauge.fetched_ms();
                }
                running = true;
                let deps = deps.clone();
                let status = Arc::clone(&status);
                let done = done_tx.clone();
                tokio::spawn(async move {
                    let result = run_cycle(&deps, &status, p.force, p.intermediate).await;
                    let _ = done.send(result).await;
                });
            }

            Some(result) = done_rx.recv(), if running => {
                running = false;
                status.lock().apply_in_progress = false;

                match result {
                    Ok(CycleOutcome::Converged) => {
                        {
                            let mut st = status.lock();
                            st.failed_updates = 0;
                            st.update_failed = false;
                            st.update_pending = false;
                            st.update_downloaded = false;
                            st.last_successful_update_ms = Some(epoch_ms());
                        }
                        deps.events.publish_apply_end(None);
                        if last_device_only {
                            // Waiting for external convergence on host-level
                            // settings: back off exponentially.
                            device_streak += 1;
                            let delay = Duration::from_secs(1 << device_streak.min(9))
                                .min(MAX_CONVERGENCE_BACKOFF);
                            arm(&mut pending, false, delay);
                        } else {
                            device_streak = 0;
                            arm(&mut pending, false, CONVERGED_RECHECK_DELAY);
                        }
                    }
                    Ok(CycleOutcome::Applied { downloaded }) => {
                        {
                            let mut st = status.lock();
                            st.update_pending = true;
                            st.update_downloaded |= downloaded;
                        }
                        last_device_only = false;
                        device_streak = 0;
                        arm(&mut pending, false, INTER_CYCLE_DELAY);
                    }
                    Ok(CycleOutcome::DeviceConfig) => {
                        last_device_only = true;
                        arm(&mut pending, false, INTER_CYCLE_DELAY);
                    }
                    Ok(CycleOutcome::Skipped) => {}
                    Err(e) => {
                        let delay = {
                            let mut st = status.lock();
                            st.failed_updates += 1;
                            st.update_failed = true;
                            failure_backoff(st.failed_updates, deps.config.poll_interval())
                        };
                        if e.is_updates_locked() {
                            info!(retry_in = ?delay, "apply blocked by update locks");
                        } else {
                            error!(error = %e, retry_in = ?delay, "apply failed");
                        }
                        deps.events.publish_apply_end(Some(e.to_string()));
                        arm(&mut pending, false, delay);
                    }
                }

                // A trigger that arrived mid-apply fires now
                if let Some((force, delay)) = scheduled.take() {
                    arm(&mut pending, force, delay);
                }
            }
        }
    }
}

/// Arm (or tighten) the pending one-shot.
fn arm(pending: &mut Option<Pending>, force: bool, delay: Duration) {
    let deadline = Instant::now() + delay;
    match pending {
        Some(p) => {
            p.force |= force;
            p.deadline = p.deadline.min(deadline);
        }
        None => *pending = Some(Pending { deadline, force, intermediate: false }),
    }
}

/// `min(2^failed * base, max_poll)`
fn failure_backoff(failed_updates: u32, max_poll: Duration) -> Duration {
    FAILURE_BACKOFF_BASE
        .saturating_mul(1u32 << failed_updates.min(16))
        .min(max_poll)
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One plan-then-execute pass.
async fn run_cycle(
    deps: &ApplyDeps,
    status: &Mutex<ApplyStatus>,
    force: bool,
    intermediate: bool,
) -> Result<CycleOutcome, SupervisorError> {
    if !intermediate {
        // Await the pause blocker; intermediate applies bypass it.
        drop(deps.locks.read("pause").await);
    }
    // The device may have started going down while we waited at the gate
    if status.lock().shutting_down {
        return Ok(CycleOutcome::Skipped);
    }
    // One apply cycle plans and executes at a time.
    let _infer = deps.locks.write("inferSteps").await;

    let target_state = deps.target.get_target(intermediate).await;
    let target_apps = target_state.instantiate();
    let current = deps.manager.get_current_apps().await?;
    let images = deps.manager.available_images().await?;
    let volatile = deps.target.volatile();
    let device_diff = device_config_diff(
        &target_state.local.config,
        &deps.config.device_config(),
    );

    let steps = plan(&PlanInput {
        current: &current,
        target: &target_apps,
        images: &images,
        volatile: &volatile,
        device_diff: &device_diff,
    });

    if steps.is_empty() {
        record_commits(deps, &target_apps)?;
        return Ok(CycleOutcome::Converged);
    }

    let device_only = steps.iter().all(|s| matches!(s, Step::SetConfig { .. }));
    let downloaded = steps.iter().any(|s| matches!(s, Step::Fetch { .. }));
    let summary = deps
        .executor
        .execute_all(steps, ExecOpts { force, skip_lock: intermediate })
        .await;
    summary.into_result()?;

    Ok(if device_only {
        CycleOutcome::DeviceConfig
    } else {
        CycleOutcome::Applied { downloaded }
    })
}

/// Target device-config entries that differ from the applied map.
fn device_config_diff(
    target: &BTreeMap<String, String>,
    applied: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    target
        .iter()
        .filter(|(k, v)| applied.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// A converged cycle makes every target release fully applied: record its
/// commit for status readers.
fn record_commits(deps: &ApplyDeps, target_apps: &[steward_core::App]) -> Result<(), SupervisorError> {
    for app in target_apps {
        if let Some(commit) = &app.commit {
            if deps.target.get_commit_for_app(app.app_id).as_deref() != Some(commit) {
                deps.target
                    .set_commit_for_app(app.app_id, commit)
                    .map_err(|e| SupervisorError::Inconsistency(format!("commit persist: {e}")))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "apply_tests.rs"]
mod tests;
