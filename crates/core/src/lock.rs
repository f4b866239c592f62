// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed in-process reader/writer locks.
//!
//! Guards are owned and release on drop, so a lock taken on any code path is
//! released on every exit path, including early `?` returns. Writers are
//! exclusive, readers shared. Lock entries are created on first use and kept
//! for the life of the process; the key space is small (a handful of fixed
//! names plus one entry per app).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

pub type ReadGuard = OwnedRwLockReadGuard<()>;
pub type WriteGuard = OwnedRwLockWriteGuard<()>;

/// A map of named reader/writer locks.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock();
        match map.get(key) {
            Some(lock) => Arc::clone(lock),
            None => {
                let lock = Arc::new(RwLock::new(()));
                map.insert(key.to_string(), Arc::clone(&lock));
                lock
            }
        }
    }

    /// Acquire a shared read lock on `key`, suspending until available.
    pub async fn read(&self, key: &str) -> ReadGuard {
        self.entry(key).read_owned().await
    }

    /// Acquire an exclusive write lock on `key`, suspending until available.
    pub async fn write(&self, key: &str) -> WriteGuard {
        self.entry(key).write_owned().await
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
