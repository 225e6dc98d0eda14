// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store gateway: the engine's view of the well-known object.

use crate::backend::{StoreBackend, StoreError, MIRROR_OBJECT_NAME};
use crate::keys;
use crate::notify::{NotifyMessage, NotifyMode};
use mirror_core::{DirPath, DirectoryEntry, InstanceId, InstanceRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Gateway over one filesystem's well-known object.
///
/// Cheap to clone; the backend handle is scoped to the filesystem's
/// metadata pool.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn StoreBackend>,
    object: String,
}

impl Gateway {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend, object: MIRROR_OBJECT_NAME.to_string() }
    }

    /// Create the well-known object (mirroring enable).
    pub async fn create_mirror_object(&self) -> Result<(), StoreError> {
        self.backend.create_object(&self.object).await
    }

    /// Delete the well-known object (mirroring disable).
    pub async fn remove_mirror_object(&self) -> Result<(), StoreError> {
        self.backend.remove_object(&self.object).await
    }

    /// Snapshot of the persisted directory map.
    pub async fn load_directory_map(
        &self,
    ) -> Result<BTreeMap<DirPath, DirectoryEntry>, StoreError> {
        let raw = self.backend.read_keys(&self.object).await?;
        let mut map = BTreeMap::new();
        for (key, value) in &raw {
            if let Some(path) = keys::decode_dir_key(key) {
                let path = DirPath::normalize(path)
                    .map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))?;
                map.insert(path, keys::decode_entry(key, value)?);
            }
        }
        debug!(directories = map.len(), "loaded directory map");
        Ok(map)
    }

    /// Snapshot of the persisted instance map.
    pub async fn load_instances(
        &self,
    ) -> Result<BTreeMap<InstanceId, InstanceRecord>, StoreError> {
        let raw = self.backend.read_keys(&self.object).await?;
        let mut map = BTreeMap::new();
        for (key, value) in &raw {
            if let Some(id) = keys::decode_instance_key(key) {
                map.insert(InstanceId::new(id), keys::decode_record(key, value)?);
            }
        }
        debug!(instances = map.len(), "loaded instance map");
        Ok(map)
    }

    /// Atomically persist a batch of directory-map updates and removals.
    pub async fn apply_directory_update(
        &self,
        updates: &BTreeMap<DirPath, DirectoryEntry>,
        removals: &[DirPath],
    ) -> Result<(), StoreError> {
        let mut raw = BTreeMap::new();
        for (path, entry) in updates {
            raw.insert(keys::dir_key(path), keys::encode_entry(entry)?);
        }
        let removals = removals.iter().map(keys::dir_key).collect();
        self.backend.write_keys(&self.object, raw, removals).await
    }

    /// Atomically persist a batch of instance-map additions and removals.
    pub async fn apply_instance_update(
        &self,
        added: &BTreeMap<InstanceId, InstanceRecord>,
        removed: &[InstanceId],
    ) -> Result<(), StoreError> {
        let mut raw = BTreeMap::new();
        for (id, record) in added {
            raw.insert(keys::instance_key(id), keys::encode_record(record)?);
        }
        let removals = removed.iter().map(keys::instance_key).collect();
        self.backend.write_keys(&self.object, raw, removals).await
    }

    /// Publish an acquire/release notification and resolve with the worker
    /// result code.
    pub async fn notify_worker(
        &self,
        dir_path: &DirPath,
        mode: NotifyMode,
    ) -> Result<i32, StoreError> {
        let payload = serde_json::to_vec(&NotifyMessage { dir_path: dir_path.clone(), mode })
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.backend.notify(&self.object, payload).await
    }

    /// Live worker set: watchers of the well-known object carrying the
    /// instance-id prefix.
    pub async fn live_instances(&self) -> Result<BTreeMap<InstanceId, String>, StoreError> {
        let watchers = self.backend.list_watchers(&self.object).await?;
        Ok(watchers
            .into_iter()
            .map(|w| (InstanceId::new(w.id), w.addr))
            .filter(|(id, _)| id.is_mirror_instance())
            .collect())
    }

    /// Wakeup stream for watcher-set changes.
    pub async fn watch(&self) -> Result<mpsc::Receiver<()>, StoreError> {
        self.backend.watch(&self.object).await
    }

    /// Fence a departed worker's address.
    pub async fn blocklist(&self, addr: &str) -> Result<(), StoreError> {
        self.backend.blocklist(addr).await
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
