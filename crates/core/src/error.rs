// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error kinds and the management command result triple.
//!
//! Management-facing return codes follow the negative-errno convention;
//! `rc()` maps every error kind onto one.

use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced by the policy engine and the management layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// Malformed peer spec, self-peering, non-absolute path, or an
    /// operation against a filesystem that is not mirrored.
    #[error("{0}")]
    InvalidArgument(String),

    /// Filesystem absent, or directory not tracked.
    #[error("{0}")]
    NotFound(String),

    /// Directory already tracked, or remote already stamped with a
    /// different mirror identity.
    #[error("{0}")]
    AlreadyExists(String),

    /// Add requested for a path whose removal is still draining.
    #[error("{0}")]
    RemovalInProgress(String),

    /// The shared object store could not serve a read or write.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The cluster refused to fence a departed instance. Fatal for the
    /// affected filesystem; the manager re-initializes on the next fs map.
    #[error("failed to fence instance at {addr}: {reason}")]
    InstanceFenceFailed { addr: String, reason: String },

    /// The engine no longer accepts intents.
    #[error("mirror engine is shutting down")]
    ShuttingDown,
}

impl MirrorError {
    /// Negative errno for the management surface.
    pub fn rc(&self) -> i32 {
        let errno = match self {
            MirrorError::InvalidArgument(_) => Errno::EINVAL,
            MirrorError::NotFound(_) => Errno::ENOENT,
            MirrorError::AlreadyExists(_) => Errno::EEXIST,
            MirrorError::RemovalInProgress(_) => Errno::EAGAIN,
            MirrorError::StoreUnavailable(_) => Errno::EIO,
            MirrorError::InstanceFenceFailed { .. } => Errno::EIO,
            MirrorError::ShuttingDown => Errno::ESHUTDOWN,
        };
        -(errno as i32)
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;

/// The `(rc, json_body, err_msg)` triple every management command returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub rc: i32,
    pub out: String,
    pub err: String,
}

impl CommandResult {
    /// Success with a JSON body.
    pub fn ok(out: impl Into<String>) -> Self {
        Self { rc: 0, out: out.into(), err: String::new() }
    }

    /// Success with an empty JSON object body.
    pub fn ok_empty() -> Self {
        Self::ok("{}")
    }

    pub fn is_ok(&self) -> bool {
        self.rc == 0
    }
}

impl From<MirrorError> for CommandResult {
    fn from(e: MirrorError) -> Self {
        Self { rc: e.rc(), out: String::new(), err: e.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
