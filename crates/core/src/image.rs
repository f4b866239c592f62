// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image records tracked during fetches.

use serde::{Deserialize, Serialize};

/// One image a release depends on, keyed by `image_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub image_id: u32,
    /// Registry reference the image is pulled by.
    pub name: String,
    pub app_id: u32,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u32>,
    /// Runtime-assigned id, once the image exists locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image_id: Option<String>,
    pub status: ImageStatus,
    /// 0-100 while downloading, `None` otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_progress: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageStatus {
    Downloading,
    Downloaded,
    Deleting,
}
