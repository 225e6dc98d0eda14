// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted directory-map entry.

use crate::instance::InstanceId;
use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !*v
}

/// The durable value stored per tracked directory in the well-known object.
///
/// `version` is monotonic per entry: it starts at 1 when the directory is
/// added, the write completing the initial assignment keeps it, and every
/// later persisted change to an already-assigned entry bumps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub version: u64,
    /// Assigned worker; absent while the initial assignment is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    /// Timestamp (epoch ms) of the last (re)assignment.
    #[serde(default)]
    pub mapped_time: u64,
    /// Removal in progress; a purging entry is never reassigned.
    #[serde(default, skip_serializing_if = "is_false")]
    pub purging: bool,
}

impl DirectoryEntry {
    /// Fresh entry as persisted by `add_dir` before any assignment.
    pub fn unassigned() -> Self {
        Self { version: 1, instance_id: None, mapped_time: 0, purging: false }
    }

    pub fn is_assigned(&self) -> bool {
        self.instance_id.is_some()
    }

    pub fn assigned_to(&self, id: &InstanceId) -> bool {
        self.instance_id.as_ref() == Some(id)
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
