// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory update locks.
//!
//! Co-resident workloads block updates for a service by creating lock files
//! at a conventional path. Two filenames must both be taken for full
//! coverage (`updates.lock` and the legacy `resin-updates.lock`); a legacy
//! root directory is honored as an alias. The [`UpdateLocks::lock`]
//! combinator is the atom: nothing else creates or unlinks lock files, and
//! every file the process still holds is unlinked by the exit handler.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use steward_core::{KeyedLocks, SupervisorError};
use tracing::{debug, warn};

/// Both filenames are created per service; workloads may hold either.
pub const LOCKFILE_NAMES: [&str; 2] = ["updates.lock", "resin-updates.lock"];

pub struct UpdateLocks {
    root: PathBuf,
    legacy_root: PathBuf,
    keyed: KeyedLocks,
    /// Lock files this process currently holds, for exit cleanup.
    held: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl UpdateLocks {
    pub fn new(root: PathBuf, legacy_root: PathBuf, keyed: KeyedLocks) -> Self {
        Self { root, legacy_root, keyed, held: Arc::new(Mutex::new(BTreeSet::new())) }
    }

    /// Run `thunk` while holding the advisory locks for every service of
    /// `app_id`, and the in-process writer lock on the app key.
    ///
    /// With `app_id == None` the thunk runs without any advisory locking.
    /// `force` pre-unlinks lock files other workloads hold. On any
    /// "already locked" acquisition the files taken so far are released in
    /// reverse order and the call fails with `UpdatesLocked`; the thunk's
    /// own outcome is propagated either way.
    pub async fn lock<T, F, Fut>(
        &self,
        app_id: Option<u32>,
        force: bool,
        thunk: F,
    ) -> Result<T, SupervisorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SupervisorError>>,
    {
        let Some(app_id) = app_id else {
            return thunk().await;
        };

        let _guard = self.keyed.write(&app_id.to_string()).await;
        let taken = self.take_app_locks(app_id, force)?;
        let result = thunk().await;
        self.release(&taken);
        result
    }

    /// Take both lock files for every service directory of the app, under
    /// the current and legacy roots.
    fn take_app_locks(&self, app_id: u32, force: bool) -> Result<Vec<PathBuf>, SupervisorError> {
        let mut taken: Vec<PathBuf> = Vec::new();
        for root in [&self.root, &self.legacy_root] {
            let app_dir = root.join("services").join(app_id.to_string());
            let entries = match fs::read_dir(&app_dir) {
                Ok(entries) => entries,
                // No lock directory: nothing to coordinate with
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    self.release(&taken);
                    return Err(SupervisorError::Runtime(format!(
                        "reading lock directory {}: {e}",
                        app_dir.display()
                    )));
                }
            };
            for entry in entries.flatten() {
                if !entry.path().is_dir() {
                    continue;
                }
                for name in LOCKFILE_NAMES {
                    let path = entry.path().join(name);
                    if let Err(e) = self.take_one(&path, force) {
                        self.release(&taken);
                        return Err(e);
                    }
                    taken.push(path);
                }
            }
        }
        Ok(taken)
    }

    fn take_one(&self, path: &Path, force: bool) -> Result<(), SupervisorError> {
        if force {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "force-unlinked existing lock file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SupervisorError::Runtime(format!(
                        "unlinking {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {
                self.held.lock().insert(path.to_path_buf());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(SupervisorError::UpdatesLocked),
            // Parent directory vanished between read_dir and open: no lock
            // to coordinate with.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(SupervisorError::Runtime(format!("creating {}: {e}", path.display())))
            }
        }
    }

    /// Unlink lock files in reverse acquisition order.
    fn release(&self, taken: &[PathBuf]) {
        let mut held = self.held.lock();
        for path in taken.iter().rev() {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to release lock file");
                }
            }
            held.remove(path);
        }
    }

    /// Unconditionally unlink every lock file the process still holds.
    /// Called from the exit handler; safe to call more than once.
    pub fn cleanup_all(&self) {
        let paths: Vec<PathBuf> = {
            let mut held = self.held.lock();
            std::mem::take(&mut *held).into_iter().collect()
        };
        for path in paths.iter().rev() {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to unlink lock file at exit");
                }
            }
        }
    }

    /// Number of lock files currently held (diagnostics).
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
