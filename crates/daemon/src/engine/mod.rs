// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciliation engine: planner, executor, application manager and
//! the apply loop.

pub mod apply;
pub mod executor;
pub mod manager;
pub mod planner;

#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use apply::{pausing_apply, ApplyDeps, ApplyHandle, ApplyLoop, ApplyStatus};
pub use executor::{ExecOpts, StepExecutor};
pub use manager::{AppManager, ServiceSelector};
pub use planner::{plan, PlanInput};

/// Gauge of in-flight image fetches and time spent fetching, read by the
/// apply-loop healthcheck to avoid flagging long downloads as stuck applies.
#[derive(Clone, Default)]
pub struct FetchGauge {
    inner: Arc<GaugeInner>,
}

#[derive(Default)]
struct GaugeInner {
    in_flight: AtomicU32,
    fetched_ms: AtomicU64,
}

impl FetchGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a fetch as started; the guard accounts for it until dropped.
    pub fn begin(&self) -> FetchInFlight {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        FetchInFlight { gauge: self.clone(), started: Instant::now() }
    }

    pub fn in_flight(&self) -> u32 {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Total milliseconds spent fetching over the process lifetime.
    pub fn fetched_ms(&self) -> u64 {
        self.inner.fetched_ms.load(Ordering::Relaxed)
    }
}

/// Scoped handle for one in-flight fetch.
pub struct FetchInFlight {
    gauge: FetchGauge,
    started: Instant,
}

impl Drop for FetchInFlight {
    fn drop(&mut self) {
        self.gauge.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.gauge
            .inner
            .fetched_ms
            .fetch_add(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}
