// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System host primitives.
//!
//! Power actions go through `systemctl`; the blink pattern drives the
//! device LED trigger when one is configured.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::{HostPrimitive, RuntimeError};

pub struct SystemHost {
    /// Sysfs trigger file of the indicator LED, when the device has one.
    led_trigger: Option<PathBuf>,
}

impl SystemHost {
    pub fn new() -> Self {
        let led_trigger =
            std::env::var("STEWARD_LED_TRIGGER").ok().map(PathBuf::from).filter(|p| p.exists());
        Self { led_trigger }
    }

    async fn systemctl(arg: &str) -> Result<(), RuntimeError> {
        let output = tokio::process::Command::new("systemctl")
            .arg(arg)
            .output()
            .await
            .map_err(|e| RuntimeError::Request(format!("systemctl {arg}: {e}")))?;
        if !output.status.success() {
            return Err(RuntimeError::Request(format!(
                "systemctl {arg} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn set_led(&self, value: &str) -> Result<(), RuntimeError> {
        let Some(path) = &self.led_trigger else {
            info!(value, "no LED configured, blink is a no-op");
            return Ok(());
        };
        tokio::fs::write(path, value)
            .await
            .map_err(|e| RuntimeError::Request(format!("writing LED trigger: {e}")))
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostPrimitive for SystemHost {
    async fn reboot(&self) -> Result<(), RuntimeError> {
        Self::systemctl("reboot").await
    }

    async fn shutdown(&self) -> Result<(), RuntimeError> {
        Self::systemctl("poweroff").await
    }

    async fn blink_start(&self) -> Result<(), RuntimeError> {
        self.set_led("timer").await
    }

    async fn blink_stop(&self) -> Result<(), RuntimeError> {
        self.set_led("none").await
    }
}
