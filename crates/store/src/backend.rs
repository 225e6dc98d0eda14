// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object-store backend interface.
//!
//! One backend handle is scoped to a single pool (the metadata pool of the
//! mirrored filesystem), mirroring the ioctx the management layer opens.

use async_trait::async_trait;
use mirror_core::MirrorError;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Name of the per-filesystem well-known object in the metadata pool.
pub const MIRROR_OBJECT_NAME: &str = "mirror";

/// Errors from the object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Unavailable(String),

    #[error("corrupt store payload: {0}")]
    Corrupt(String),

    #[error("blocklist of {addr} failed: {reason}")]
    BlocklistFailed { addr: String, reason: String },
}

impl From<StoreError> for MirrorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::BlocklistFailed { addr, reason } => {
                MirrorError::InstanceFenceFailed { addr, reason }
            }
            other => MirrorError::StoreUnavailable(other.to_string()),
        }
    }
}

/// A watch registration on an object: id plus the network address it
/// registered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watcher {
    pub id: String,
    pub addr: String,
}

/// Narrow interface to the shared object store.
///
/// Key/value reads and writes address the omap of a named object. Batched
/// writes are atomic: either every update and removal applies, or none do.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Create the named object (idempotent).
    async fn create_object(&self, object: &str) -> Result<(), StoreError>;

    /// Delete the named object and its keys.
    async fn remove_object(&self, object: &str) -> Result<(), StoreError>;

    /// Snapshot every key/value pair of the object.
    async fn read_keys(&self, object: &str) -> Result<BTreeMap<String, Vec<u8>>, StoreError>;

    /// Durably apply a batch of key updates and removals, atomically.
    async fn write_keys(
        &self,
        object: &str,
        updates: BTreeMap<String, Vec<u8>>,
        removals: Vec<String>,
    ) -> Result<(), StoreError>;

    /// Publish a payload on the object's notify channel and resolve with the
    /// worker result code once acknowledged or timed out (0 = success).
    async fn notify(&self, object: &str, payload: Vec<u8>) -> Result<i32, StoreError>;

    /// Current watch registrations on the object.
    async fn list_watchers(&self, object: &str) -> Result<Vec<Watcher>, StoreError>;

    /// Wakeup stream that fires whenever the watcher set changes.
    async fn watch(&self, object: &str) -> Result<mpsc::Receiver<()>, StoreError>;

    /// Fence a departed worker's network address. Synchronous from the
    /// engine's viewpoint: reassignment must not proceed until this returns.
    async fn blocklist(&self, addr: &str) -> Result<(), StoreError>;
}
