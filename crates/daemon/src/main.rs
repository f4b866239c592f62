// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! stewardd: on-device supervisor daemon.
//!
//! Wires the stores, the Docker runtime adapter and the reconciliation
//! engine together, then serves the control API until a shutdown signal.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use steward_core::{EventBus, KeyedLocks};
use steward_daemon::adapters::{DockerRuntime, EventReporter, StateReporter, SystemHost};
use steward_daemon::engine::{ApplyDeps, ApplyLoop, FetchGauge, StepExecutor};
use steward_daemon::{env, AppManager, ApiCtx, UpdateLocks};
use steward_storage::{ConfigStore, KeyStore, TargetStore};
use tracing::{error, info, warn};

/// Debounce for apply triggers nudged by runtime events.
const EVENT_DEBOUNCE: Duration = Duration::from_millis(500);

fn main() -> std::process::ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            eprintln!("stewardd: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let state_dir = env::state_dir().ok_or("cannot resolve a state directory")?;
    std::fs::create_dir_all(&state_dir)?;

    // Log to file and stderr; RUST_LOG filters both.
    let file_appender = tracing_appender::rolling::never(&state_dir, "stewardd.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info")
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // One daemon per host: exclusive lock, PID inside
    let lock_path = state_dir.join("stewardd.lock");
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| format!("another stewardd holds {}", lock_path.display()))?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // Stores
    let locks = KeyedLocks::new();
    let events = EventBus::new();
    let target = Arc::new(TargetStore::open(
        state_dir.join("target.json"),
        locks.clone(),
        events.clone(),
    )?);
    let config = Arc::new(ConfigStore::open(state_dir.join("config.json"))?);
    let keys = Arc::new(KeyStore::open(state_dir.join("keys.json"))?);
    let reporter = Arc::new(EventReporter(events.clone()));
    if !keys.has_cloud_key() {
        let token = keys.generate_cloud_key()?;
        info!("issued initial cloud API key");
        reporter.report(serde_json::json!({ "api_key": token }));
    }

    // Adapters
    let runtime: Arc<dyn steward_daemon::ContainerRuntime> =
        Arc::new(DockerRuntime::new(env::docker_socket()));
    let host = Arc::new(SystemHost::new());
    let update_locks =
        Arc::new(UpdateLocks::new(env::lockfile_root(), env::legacy_lockfile_root(), locks.clone()));

    // Engine
    let gauge = FetchGauge::new();
    let manager = AppManager::new(Arc::clone(&runtime), Arc::clone(&target));
    let executor = StepExecutor::new(
        Arc::clone(&runtime),
        Arc::clone(&update_locks),
        locks.clone(),
        Arc::clone(&config),
        events.clone(),
        reporter.clone() as Arc<dyn steward_daemon::adapters::StateReporter>,
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
        gauge.clone(),
    )
    .spawn();

    // Target writes wake the loop immediately
    {
        let apply = apply.clone();
        let mut changed = events.subscribe_target_state_changed();
        tokio::spawn(async move {
            while changed.recv().await.is_ok() {
                apply.trigger(false, Duration::ZERO, false);
            }
        });
    }

    // Steady poll cadence
    {
        let apply = apply.clone();
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(config.poll_interval()).await;
                apply.trigger(false, Duration::ZERO, false);
            }
        });
    }

    // Runtime events nudge the loop (debounced); drift converges without
    // waiting for the poll timer.
    {
        let apply = apply.clone();
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            loop {
                match runtime.events().await {
                    Ok(mut rx) => {
                        while let Some(event) = rx.recv().await {
                            if matches!(event.action.as_str(), "die" | "stop" | "start" | "oom") {
                                apply.trigger(false, EVENT_DEBOUNCE, false);
                            }
                        }
                        warn!("runtime event stream closed, reconnecting");
                    }
                    Err(e) => warn!(error = %e, "runtime events unavailable, retrying"),
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    // First reconcile pass
    apply.trigger(false, Duration::ZERO, false);

    // Control API
    let port = env::listen_port().unwrap_or_else(|| config.listen_port());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "control API listening");
    let ctx = Arc::new(ApiCtx {
        manager,
        executor,
        apply: apply.clone(),
        target,
        config,
        keys,
        host,
        reporter,
        events: events.clone(),
        locks: locks.clone(),
        vpn: Arc::new(parking_lot::Mutex::new(Default::default())),
    });
    let server = tokio::spawn(steward_daemon::serve(ctx, listener));

    // Exit on SIGTERM/SIGINT, unlinking every advisory lock file we hold
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = sigint.recv() => info!("SIGINT received"),
        res = server => {
            res??;
            return Err("control API server exited unexpectedly".into());
        }
    }

    events.publish_shutdown();
    update_locks.cleanup_all();
    info!("stewardd stopped");
    Ok(())
}
