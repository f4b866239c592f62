// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! steward-storage: durable stores for the supervisor
//!
//! Three file-backed JSON documents: the target state (with commits and the
//! volatile overlay), the device configuration, and the API keys. Each store
//! serializes its mutations under an internal mutex and persists with an
//! atomic write-temp-then-rename.

mod config;
mod keys;
mod persist;
mod target;

pub use config::{ConfigDoc, ConfigStore};
pub use keys::{KeyStore, RegeneratedKey, Scope};
pub use persist::StoreError;
pub use target::TargetStore;
