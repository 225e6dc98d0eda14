// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker notification payload.

use mirror_core::DirPath;
use serde::{Deserialize, Serialize};

/// Handshake direction for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    /// Ask the assigned instance to start mirroring the directory.
    Acquire,
    /// Ask the previously assigned instance to stop.
    Release,
}

mirror_core::simple_display! {
    NotifyMode {
        Acquire => "acquire",
        Release => "release",
    }
}

/// UTF-8 JSON payload published on the well-known object's notify channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub dir_path: DirPath,
    pub mode: NotifyMode,
}
