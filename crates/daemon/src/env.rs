// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

/// Resolve state directory: STEWARD_STATE_DIR > XDG_STATE_HOME/steward >
/// ~/.local/state/steward
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("STEWARD_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("steward"));
    }
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".local/state/steward"))
}

/// Root of the advisory lockfile tree shared with co-resident workloads.
pub fn lockfile_root() -> PathBuf {
    std::env::var("STEWARD_LOCK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/balena-supervisor"))
}

/// Legacy lockfile root, accepted as an alias at startup.
pub fn legacy_lockfile_root() -> PathBuf {
    std::env::var("STEWARD_LEGACY_LOCK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/resin-supervisor"))
}

/// Path of the container runtime's Unix socket.
pub fn docker_socket() -> PathBuf {
    std::env::var("STEWARD_DOCKER_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/docker.sock"))
}

/// Listen port override; the config store's `listenPort` applies otherwise.
pub fn listen_port() -> Option<u16> {
    std::env::var("STEWARD_LISTEN_PORT").ok().and_then(|s| s.parse().ok())
}
