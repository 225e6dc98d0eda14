// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Management surface: per-filesystem engine lifecycle and peer bootstrap.
//!
//! `MirrorManager` owns one policy engine per mirrored filesystem and exposes
//! the management commands. It reaches the cluster through two narrow seams:
//! [`ClusterClient`] (fs-map mutations, pools, fencing identity) and
//! [`RemoteConnector`] (peer filesystems, for the mirror stamp). Every entry
//! point catches engine errors and returns the `(rc, json, err)` triple.

use crate::controller::{self, FsPolicyConfig, FsPolicyHandle};
use async_trait::async_trait;
use mirror_core::{CommandResult, DirPath, MirrorError, MirrorInfo, MirrorResult, PeerSpec};
use mirror_store::{Gateway, StoreBackend};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One peer of a mirrored filesystem, as recorded in the fs map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Qualified client name, e.g. `client.mirror`.
    pub client_name: String,
    pub cluster_name: String,
    pub fs_name: String,
}

/// Mirroring configuration of a filesystem: peer uuid → peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsMirrorInfo {
    pub peers: BTreeMap<String, PeerInfo>,
}

/// One filesystem in the fs map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemInfo {
    pub name: String,
    pub id: u64,
    pub metadata_pool: i64,
    /// Present when mirroring is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_info: Option<FsMirrorInfo>,
}

/// The cluster's filesystem map, delivered on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsMap {
    pub filesystems: Vec<FilesystemInfo>,
}

impl FsMap {
    pub fn find(&self, name: &str) -> Option<&FilesystemInfo> {
        self.filesystems.iter().find(|fs| fs.name == name)
    }

    fn mirrored(&self) -> BTreeSet<String> {
        self.filesystems
            .iter()
            .filter(|fs| fs.mirror_info.is_some())
            .map(|fs| fs.name.clone())
            .collect()
    }
}

/// Cluster-facing operations the manager depends on.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Local cluster fsid.
    fn cluster_id(&self) -> Uuid;

    /// Open the metadata pool backing a filesystem's well-known object.
    async fn open_pool(&self, pool_id: i64) -> MirrorResult<Arc<dyn StoreBackend>>;

    async fn enable_mirror(&self, fs_name: &str) -> MirrorResult<()>;
    async fn disable_mirror(&self, fs_name: &str) -> MirrorResult<()>;
    async fn peer_add(
        &self,
        fs_name: &str,
        spec: &PeerSpec,
        remote_fs_name: &str,
    ) -> MirrorResult<()>;
    async fn peer_remove(&self, fs_name: &str, peer_uuid: &str) -> MirrorResult<()>;
}

/// Connects to peer filesystems for stamping.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        spec: &PeerSpec,
        fs_name: &str,
    ) -> MirrorResult<Box<dyn RemoteFilesystem>>;
}

/// A connected peer filesystem root.
#[async_trait]
pub trait RemoteFilesystem: Send + Sync {
    /// The peer cluster's fsid.
    fn cluster_id(&self) -> Uuid;

    /// Read the mirror stamp, if any.
    async fn mirror_info(&self) -> MirrorResult<Option<MirrorInfo>>;

    /// Stamp the root, create-exclusive: `AlreadyExists` when any stamp is
    /// present.
    async fn set_mirror_info(&self, info: &MirrorInfo) -> MirrorResult<()>;

    /// Remove the stamp; an absent stamp is not an error.
    async fn remove_mirror_info(&self) -> MirrorResult<()>;
}

struct EngineEntry {
    handle: FsPolicyHandle,
    gateway: Gateway,
}

/// Per-cluster mirror manager. The outer management layer owns it and
/// serializes calls; engines it spawns run on their own tasks.
pub struct MirrorManager {
    cluster: Arc<dyn ClusterClient>,
    remotes: Arc<dyn RemoteConnector>,
    config: FsPolicyConfig,
    fs_map: FsMap,
    engines: HashMap<String, EngineEntry>,
}

impl MirrorManager {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        remotes: Arc<dyn RemoteConnector>,
        config: FsPolicyConfig,
    ) -> Self {
        Self { cluster, remotes, config, fs_map: FsMap::default(), engines: HashMap::new() }
    }

    /// React to an fs-map change: tear down engines for filesystems no
    /// longer mirrored (deleting their well-known object), bootstrap engines
    /// for newly mirrored ones, and restart failed engines. Bootstrap
    /// failures are logged and retried on the next fs map.
    pub async fn handle_fs_map(&mut self, fs_map: FsMap) {
        self.fs_map = fs_map;
        let mirrored = self.fs_map.mirrored();
        debug!(filesystems = mirrored.len(), "refreshing mirrored filesystems");

        let current: Vec<String> = self.engines.keys().cloned().collect();
        for name in current {
            let failed = self.engines.get(&name).is_some_and(|e| e.handle.is_failed());
            if mirrored.contains(&name) && !failed {
                continue;
            }
            if let Some(entry) = self.engines.remove(&name) {
                info!(fs = %name, failed, "shutting down policy engine");
                entry.handle.shutdown().await;
                if !mirrored.contains(&name) {
                    if let Err(e) = entry.gateway.remove_mirror_object().await {
                        warn!(fs = %name, error = %e, "failed to remove mirror object");
                    }
                }
            }
        }

        for name in mirrored {
            if !self.engines.contains_key(&name) {
                if let Err(e) = self.init_fs_engine(&name).await {
                    error!(fs = %name, error = %e, "failed to initialize policy engine");
                }
            }
        }
    }

    /// Shut down every engine (module teardown).
    pub async fn shutdown(&mut self) {
        for (name, entry) in self.engines.drain() {
            info!(fs = %name, "shutting down policy engine");
            entry.handle.shutdown().await;
        }
    }

    async fn init_fs_engine(&mut self, fs_name: &str) -> MirrorResult<()> {
        let fs = self.require_fs(fs_name)?;
        let backend = self.cluster.open_pool(fs.metadata_pool).await?;
        let gateway = Gateway::new(backend);
        let dir_mapping = gateway.load_directory_map().await?;
        let instances = gateway.load_instances().await?;
        info!(
            fs = %fs_name,
            directories = dir_mapping.len(),
            instances = instances.len(),
            "initializing policy engine"
        );
        let handle =
            controller::spawn(gateway.clone(), self.config.clone(), dir_mapping, instances)
                .await?;
        self.engines.insert(fs_name.to_string(), EngineEntry { handle, gateway });
        Ok(())
    }

    fn require_fs(&self, fs_name: &str) -> MirrorResult<&FilesystemInfo> {
        self.fs_map
            .find(fs_name)
            .ok_or_else(|| MirrorError::NotFound(format!("filesystem {fs_name} does not exist")))
    }

    fn engine(&self, fs_name: &str) -> MirrorResult<&EngineEntry> {
        self.engines.get(fs_name).ok_or_else(|| {
            MirrorError::InvalidArgument(format!("filesystem {fs_name} is not mirrored"))
        })
    }

    pub async fn enable_mirror(&mut self, fs_name: &str) -> CommandResult {
        info!(fs = %fs_name, "enabling mirroring");
        match self.enable_mirror_inner(fs_name).await {
            Ok(()) => CommandResult::ok_empty(),
            Err(e) => e.into(),
        }
    }

    async fn enable_mirror_inner(&mut self, fs_name: &str) -> MirrorResult<()> {
        let fs = self.fs_map.find(fs_name).ok_or_else(|| {
            MirrorError::InvalidArgument(format!(
                "cannot find metadata pool for filesystem {fs_name}"
            ))
        })?;
        let backend = self.cluster.open_pool(fs.metadata_pool).await?;
        Gateway::new(backend).create_mirror_object().await?;
        self.cluster.enable_mirror(fs_name).await
    }

    /// The engine itself is torn down (and the well-known object deleted)
    /// when the resulting fs map arrives.
    pub async fn disable_mirror(&mut self, fs_name: &str) -> CommandResult {
        info!(fs = %fs_name, "disabling mirroring");
        match self.cluster.disable_mirror(fs_name).await {
            Ok(()) => CommandResult::ok_empty(),
            Err(e) => e.into(),
        }
    }

    pub async fn peer_add(
        &mut self,
        fs_name: &str,
        remote_cluster_spec: &str,
        remote_fs_name: Option<&str>,
    ) -> CommandResult {
        match self.peer_add_inner(fs_name, remote_cluster_spec, remote_fs_name).await {
            Ok(()) => CommandResult::ok_empty(),
            Err(e) => e.into(),
        }
    }

    async fn peer_add_inner(
        &mut self,
        fs_name: &str,
        remote_cluster_spec: &str,
        remote_fs_name: Option<&str>,
    ) -> MirrorResult<()> {
        let remote_fs_name = remote_fs_name.unwrap_or(fs_name);
        self.engine(fs_name)?;
        let spec: PeerSpec = remote_cluster_spec.parse()?;
        debug!(fs = %fs_name, peer = %spec, remote_fs = %remote_fs_name, "adding peer");
        self.verify_and_set_mirror_info(fs_name, &spec, remote_fs_name).await?;
        self.cluster.peer_add(fs_name, &spec, remote_fs_name).await
    }

    async fn verify_and_set_mirror_info(
        &self,
        fs_name: &str,
        spec: &PeerSpec,
        remote_fs_name: &str,
    ) -> MirrorResult<()> {
        let local_fs = self.require_fs(fs_name)?;
        let remote = self.remotes.connect(spec, remote_fs_name).await?;

        let local_cluster_id = self.cluster.cluster_id();
        // post cluster id comparison, filesystem name comparison suffices
        if local_cluster_id == remote.cluster_id() && fs_name == remote_fs_name {
            return Err(MirrorError::InvalidArgument(
                "source and destination cluster fsid and file-system name can't be the same"
                    .to_string(),
            ));
        }

        let info = MirrorInfo { cluster_id: local_cluster_id, fs_id: local_fs.id };
        info!(fs = %fs_name, %info, "stamping remote filesystem");
        match remote.set_mirror_info(&info).await {
            Ok(()) => Ok(()),
            Err(MirrorError::AlreadyExists(_)) => {
                let existing = remote.mirror_info().await?.ok_or_else(|| {
                    MirrorError::InvalidArgument(
                        "error fetching mirror info from remote".to_string(),
                    )
                })?;
                if existing == info {
                    Ok(())
                } else {
                    Err(MirrorError::AlreadyExists(format!(
                        "peer mirrored by: (cluster_id: {}, fs_id: {})",
                        existing.cluster_id, existing.fs_id
                    )))
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn peer_remove(&mut self, fs_name: &str, peer_uuid: &str) -> CommandResult {
        match self.peer_remove_inner(fs_name, peer_uuid).await {
            Ok(()) => CommandResult::ok_empty(),
            Err(e) => e.into(),
        }
    }

    async fn peer_remove_inner(&self, fs_name: &str, peer_uuid: &str) -> MirrorResult<()> {
        self.engine(fs_name)?;
        // The remote stamp goes first, then the peer leaves the fs map;
        // workers lagging on fs-map updates keep synchronizing until the
        // map lands. TODO: purge the stamp on the fs-map update instead,
        // once workers ack the epoch they have seen.
        self.purge_mirror_info(fs_name, peer_uuid).await?;
        self.cluster.peer_remove(fs_name, peer_uuid).await
    }

    async fn purge_mirror_info(&self, fs_name: &str, peer_uuid: &str) -> MirrorResult<()> {
        let fs = self.require_fs(fs_name)?;
        let Some(peer) = fs.mirror_info.as_ref().and_then(|mi| mi.peers.get(peer_uuid)) else {
            debug!(fs = %fs_name, peer_uuid, "peer not present; nothing to purge");
            return Ok(());
        };
        let spec: PeerSpec =
            format!("{}@{}", peer.client_name, peer.cluster_name).parse()?;
        info!(fs = %fs_name, peer = %spec, "purging mirror stamp");
        let remote = self.remotes.connect(&spec, &peer.fs_name).await?;
        remote.remove_mirror_info().await
    }

    pub async fn add_dir(&self, fs_name: &str, dir_path: &str) -> CommandResult {
        match self.dir_command(fs_name, dir_path).await {
            Ok((entry, path)) => match entry.handle.add_dir(path).await {
                Ok(()) => CommandResult::ok_empty(),
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        }
    }

    pub async fn remove_dir(&self, fs_name: &str, dir_path: &str) -> CommandResult {
        match self.dir_command(fs_name, dir_path).await {
            Ok((entry, path)) => match entry.handle.remove_dir(path).await {
                Ok(()) => CommandResult::ok_empty(),
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        }
    }

    pub async fn status(&self, fs_name: &str, dir_path: &str) -> CommandResult {
        match self.dir_command(fs_name, dir_path).await {
            Ok((entry, path)) => match entry.handle.status(path).await {
                Ok(body) => CommandResult::ok(pretty(&body)),
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        }
    }

    pub async fn show_distribution(&self, fs_name: &str) -> CommandResult {
        let summary = async {
            self.require_fs(fs_name)?;
            self.engine(fs_name)?.handle.summary().await
        };
        match summary.await {
            Ok(body) => CommandResult::ok(pretty(&body)),
            Err(e) => e.into(),
        }
    }

    async fn dir_command(
        &self,
        fs_name: &str,
        dir_path: &str,
    ) -> MirrorResult<(&EngineEntry, DirPath)> {
        self.require_fs(fs_name)?;
        let entry = self.engine(fs_name)?;
        let path = DirPath::normalize(dir_path)?;
        debug!(fs = %fs_name, %path, "directory command");
        Ok((entry, path))
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
