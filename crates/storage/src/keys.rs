// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API key store.
//!
//! Two key categories: the singular cloud key (device-wide scope) and scoped
//! keys bound to one `(appId, serviceId)` pair. Only SHA-256 digests are
//! persisted; plaintext exists once, in the response that issued the key.
//! Regeneration revokes the old key in the same mutation, so the very next
//! request with it fails validation.

use std::collections::BTreeSet;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use steward_core::SupervisorError;

use crate::persist::{read_json, write_json, StoreError};

/// The set of app ids a key may mutate or observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Apps(BTreeSet<u32>),
}

impl Scope {
    /// True iff the scope is `*` or includes `app_id`.
    pub fn is_scoped(&self, app_id: u32) -> bool {
        match self {
            Scope::All => true,
            Scope::Apps(apps) => apps.contains(&app_id),
        }
    }

    /// The single app a narrowed key grants, if it grants exactly one.
    pub fn single_app(&self) -> Option<u32> {
        match self {
            Scope::All => None,
            Scope::Apps(apps) if apps.len() == 1 => apps.iter().next().copied(),
            Scope::Apps(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScopedEntry {
    digest: String,
    app_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_id: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeysDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cloud_digest: Option<String>,
    #[serde(default)]
    scoped: Vec<ScopedEntry>,
}

/// Result of a key regeneration.
pub struct RegeneratedKey {
    pub token: String,
    /// The cloud key was regenerated; callers report it on the external
    /// state channel.
    pub is_cloud: bool,
}

pub struct KeyStore {
    path: PathBuf,
    inner: Mutex<KeysDoc>,
}

fn digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn new_token() -> String {
    // Two v4 UUIDs worth of entropy, hex, no separators
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

impl KeyStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = read_json::<KeysDoc>(&path)?.unwrap_or_default();
        Ok(Self { path, inner: Mutex::new(doc) })
    }

    pub fn has_cloud_key(&self) -> bool {
        self.inner.lock().cloud_digest.is_some()
    }

    /// Issue (or replace) the cloud key, returning the plaintext token.
    pub fn generate_cloud_key(&self) -> Result<String, StoreError> {
        let token = new_token();
        let mut inner = self.inner.lock();
        inner.cloud_digest = Some(digest(&token));
        write_json(&self.path, &*inner)?;
        Ok(token)
    }

    /// Issue a key bound to `(app_id, service_id)` for service-level actions.
    pub fn generate_scoped_key(
        &self,
        app_id: u32,
        service_id: u32,
    ) -> Result<String, StoreError> {
        let token = new_token();
        let mut inner = self.inner.lock();
        inner.scoped.push(ScopedEntry {
            digest: digest(&token),
            app_id,
            service_id: Some(service_id),
        });
        write_json(&self.path, &*inner)?;
        Ok(token)
    }

    /// Validate a presented token, returning its scope.
    pub fn validate(&self, token: &str) -> Option<Scope> {
        let d = digest(token);
        let inner = self.inner.lock();
        if inner.cloud_digest.as_deref() == Some(d.as_str()) {
            return Some(Scope::All);
        }
        inner
            .scoped
            .iter()
            .find(|e| e.digest == d)
            .map(|e| Scope::Apps(BTreeSet::from([e.app_id])))
    }

    /// Issue a new random token for the authenticating key and revoke the
    /// old one in the same mutation.
    pub fn regenerate(&self, token: &str) -> Result<RegeneratedKey, SupervisorError> {
        let d = digest(token);
        let fresh = new_token();
        let mut inner = self.inner.lock();

        let is_cloud = if inner.cloud_digest.as_deref() == Some(d.as_str()) {
            inner.cloud_digest = Some(digest(&fresh));
            true
        } else if let Some(entry) = inner.scoped.iter_mut().find(|e| e.digest == d) {
            entry.digest = digest(&fresh);
            false
        } else {
            return Err(SupervisorError::Validation("unknown API key".into()));
        };

        write_json(&self.path, &*inner)
            .map_err(|e| SupervisorError::Inconsistency(format!("key persist: {e}")))?;
        Ok(RegeneratedKey { token: fresh, is_cloud })
    }
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
