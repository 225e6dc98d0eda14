// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalized absolute directory path.

use crate::error::{MirrorError, MirrorResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked directory path: absolute and lexically normalized.
///
/// The normalized form is the map key everywhere — in memory, on the wire,
/// and in the persisted directory map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirPath(String);

impl DirPath {
    /// Normalize a user-supplied path.
    ///
    /// Rejects relative paths; collapses `.`, `..`, duplicate and trailing
    /// slashes lexically.
    pub fn normalize(raw: &str) -> MirrorResult<Self> {
        if !raw.starts_with('/') {
            return Err(MirrorError::InvalidArgument(format!(
                "{raw} should be an absolute path"
            )));
        }
        let mut parts: Vec<&str> = Vec::new();
        for comp in raw.split('/') {
            match comp {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                c => parts.push(c),
            }
        }
        if parts.is_empty() {
            return Ok(Self("/".to_string()));
        }
        let mut out = String::new();
        for part in parts {
            out.push('/');
            out.push_str(part);
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DirPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for DirPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DirPath {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
#[path = "path_tests.rs"]
mod tests;
