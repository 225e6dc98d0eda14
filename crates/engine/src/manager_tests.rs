// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mirror_store::MemoryStore;
use parking_lot::Mutex;

const LOCAL_ID: &str = "2f2e3b3a-96a0-4f48-9a3b-7d11fb87f4a2";
const REMOTE_ID: &str = "7c1d7f71-4a2b-4e60-bb0a-0d8c54f2a111";

struct FakeCluster {
    id: Uuid,
    pools: Mutex<HashMap<i64, Arc<MemoryStore>>>,
    commands: Mutex<Vec<String>>,
}

impl FakeCluster {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::parse_str(id).unwrap(),
            pools: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
        })
    }

    fn pool(&self, pool_id: i64) -> Arc<MemoryStore> {
        self.pools.lock().entry(pool_id).or_insert_with(|| Arc::new(MemoryStore::new())).clone()
    }

    fn record(&self, cmd: String) {
        self.commands.lock().push(cmd);
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn cluster_id(&self) -> Uuid {
        self.id
    }

    async fn open_pool(&self, pool_id: i64) -> MirrorResult<Arc<dyn StoreBackend>> {
        Ok(self.pool(pool_id))
    }

    async fn enable_mirror(&self, fs_name: &str) -> MirrorResult<()> {
        self.record(format!("enable {fs_name}"));
        Ok(())
    }

    async fn disable_mirror(&self, fs_name: &str) -> MirrorResult<()> {
        self.record(format!("disable {fs_name}"));
        Ok(())
    }

    async fn peer_add(
        &self,
        fs_name: &str,
        spec: &PeerSpec,
        remote_fs_name: &str,
    ) -> MirrorResult<()> {
        self.record(format!("peer_add {fs_name} {spec} {remote_fs_name}"));
        Ok(())
    }

    async fn peer_remove(&self, fs_name: &str, peer_uuid: &str) -> MirrorResult<()> {
        self.record(format!("peer_remove {fs_name} {peer_uuid}"));
        Ok(())
    }
}

struct FakeRemote {
    id: Uuid,
    stamp: Arc<Mutex<Option<MirrorInfo>>>,
}

impl FakeRemote {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: Uuid::parse_str(id).unwrap(), stamp: Arc::new(Mutex::new(None)) })
    }
}

#[async_trait]
impl RemoteConnector for FakeRemote {
    async fn connect(
        &self,
        _spec: &PeerSpec,
        _fs_name: &str,
    ) -> MirrorResult<Box<dyn RemoteFilesystem>> {
        Ok(Box::new(FakeRemoteFs { id: self.id, stamp: self.stamp.clone() }))
    }
}

struct FakeRemoteFs {
    id: Uuid,
    stamp: Arc<Mutex<Option<MirrorInfo>>>,
}

#[async_trait]
impl RemoteFilesystem for FakeRemoteFs {
    fn cluster_id(&self) -> Uuid {
        self.id
    }

    async fn mirror_info(&self) -> MirrorResult<Option<MirrorInfo>> {
        Ok(*self.stamp.lock())
    }

    async fn set_mirror_info(&self, info: &MirrorInfo) -> MirrorResult<()> {
        let mut stamp = self.stamp.lock();
        if stamp.is_some() {
            return Err(MirrorError::AlreadyExists("mirror info already set".to_string()));
        }
        *stamp = Some(*info);
        Ok(())
    }

    async fn remove_mirror_info(&self) -> MirrorResult<()> {
        *self.stamp.lock() = None;
        Ok(())
    }
}

fn fs_map(mirrored: bool) -> FsMap {
    fs_map_with_peers(mirrored, BTreeMap::new())
}

fn fs_map_with_peers(mirrored: bool, peers: BTreeMap<String, PeerInfo>) -> FsMap {
    FsMap {
        filesystems: vec![FilesystemInfo {
            name: "cephfs".to_string(),
            id: 10,
            metadata_pool: 1,
            mirror_info: mirrored.then(|| FsMirrorInfo { peers }),
        }],
    }
}

/// Enable mirroring and deliver the resulting fs map, as the management
/// layer would.
async fn mirrored_manager(
    cluster: &Arc<FakeCluster>,
    remotes: &Arc<FakeRemote>,
) -> MirrorManager {
    let mut manager = MirrorManager::new(
        cluster.clone(),
        remotes.clone(),
        FsPolicyConfig::default(),
    );
    manager.handle_fs_map(fs_map(false)).await;
    assert!(manager.enable_mirror("cephfs").await.is_ok());
    manager.handle_fs_map(fs_map(true)).await;
    manager
}

#[tokio::test]
async fn enable_creates_object_and_issues_command() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    assert_eq!(cluster.commands(), vec!["enable cephfs".to_string()]);
    let store = cluster.pool(1);
    assert!(store.read_keys(mirror_store::MIRROR_OBJECT_NAME).await.is_ok());
    manager.shutdown().await;
}

#[tokio::test]
async fn enable_of_unknown_filesystem_is_einval() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager =
        MirrorManager::new(cluster.clone(), remotes.clone(), FsPolicyConfig::default());
    let res = manager.enable_mirror("nope").await;
    assert_eq!(res.rc, -22);
}

#[tokio::test]
async fn add_dir_validations() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    let res = manager.add_dir("missing", "/a").await;
    assert_eq!(res.rc, -2);
    assert!(res.err.contains("does not exist"));

    let res = manager.add_dir("cephfs", "relative/path").await;
    assert_eq!(res.rc, -22);
    assert!(res.err.contains("absolute"));

    let res = manager.add_dir("cephfs", "/a//b/./").await;
    assert!(res.is_ok(), "normalization should accept messy absolute paths: {}", res.err);
    let res = manager.add_dir("cephfs", "/a/b").await;
    assert_eq!(res.rc, -17, "normalized duplicate must collide");

    manager.handle_fs_map(fs_map(false)).await;
    let res = manager.add_dir("cephfs", "/c").await;
    assert_eq!(res.rc, -22);
    assert!(res.err.contains("not mirrored"));
    manager.shutdown().await;
}

#[tokio::test]
async fn status_and_distribution_bodies() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    assert!(manager.add_dir("cephfs", "/a").await.is_ok());
    let res = manager.status("cephfs", "/a").await;
    assert!(res.is_ok());
    let body: serde_json::Value = serde_json::from_str(&res.out).unwrap();
    assert_eq!(body["purging"], false);

    let res = manager.status("cephfs", "/missing").await;
    assert_eq!(res.rc, -2);

    let res = manager.show_distribution("cephfs").await;
    assert!(res.is_ok());
    let body: serde_json::Value = serde_json::from_str(&res.out).unwrap();
    assert_eq!(body["directory_count"], 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn peer_add_rejects_self_peer() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(LOCAL_ID); // same cluster fsid
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    let res = manager.peer_add("cephfs", "client.mirror@site-a", Some("cephfs")).await;
    assert_eq!(res.rc, -22);
    assert!(res.err.contains("can't be the same"));

    // same cluster, different filesystem name is allowed
    let res = manager.peer_add("cephfs", "client.mirror@site-a", Some("backup-fs")).await;
    assert!(res.is_ok(), "{}", res.err);
    manager.shutdown().await;
}

#[tokio::test]
async fn peer_add_stamps_remote_and_tolerates_identical_stamp() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    let res = manager.peer_add("cephfs", "client.mirror@site-b", None).await;
    assert!(res.is_ok(), "{}", res.err);
    let stamp = remotes.stamp.lock().unwrap();
    assert_eq!(stamp.cluster_id, Uuid::parse_str(LOCAL_ID).unwrap());
    assert_eq!(stamp.fs_id, 10);
    assert!(cluster
        .commands()
        .contains(&"peer_add cephfs client.mirror@site-b cephfs".to_string()));

    // re-adding with the identical stamp present is idempotent
    let res = manager.peer_add("cephfs", "client.mirror@site-b", None).await;
    assert!(res.is_ok(), "{}", res.err);
    manager.shutdown().await;
}

#[tokio::test]
async fn peer_add_rejects_foreign_stamp() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    let foreign = MirrorInfo { cluster_id: Uuid::parse_str(REMOTE_ID).unwrap(), fs_id: 99 };
    *remotes.stamp.lock() = Some(foreign);

    let res = manager.peer_add("cephfs", "client.mirror@site-b", None).await;
    assert_eq!(res.rc, -17);
    assert!(res.err.contains("peer mirrored by"));
    manager.shutdown().await;
}

#[tokio::test]
async fn peer_add_rejects_malformed_spec() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    let res = manager.peer_add("cephfs", "mirror-at-site-b", None).await;
    assert_eq!(res.rc, -22);
    assert!(res.err.contains("invalid cluster spec"));
    manager.shutdown().await;
}

#[tokio::test]
async fn peer_remove_purges_the_remote_stamp() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;

    assert!(manager.peer_add("cephfs", "client.mirror@site-b", None).await.is_ok());
    assert!(remotes.stamp.lock().is_some());

    let mut peers = BTreeMap::new();
    peers.insert(
        "c39ce41b-6f3b-4a58-a5be-be7c7fba6d01".to_string(),
        PeerInfo {
            client_name: "client.mirror".to_string(),
            cluster_name: "site-b".to_string(),
            fs_name: "cephfs".to_string(),
        },
    );
    manager.handle_fs_map(fs_map_with_peers(true, peers)).await;

    let res =
        manager.peer_remove("cephfs", "c39ce41b-6f3b-4a58-a5be-be7c7fba6d01").await;
    assert!(res.is_ok(), "{}", res.err);
    assert!(remotes.stamp.lock().is_none());
    assert!(cluster
        .commands()
        .contains(&"peer_remove cephfs c39ce41b-6f3b-4a58-a5be-be7c7fba6d01".to_string()));
    manager.shutdown().await;
}

#[tokio::test]
async fn disable_tears_down_engine_and_object() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager = mirrored_manager(&cluster, &remotes).await;
    assert!(manager.add_dir("cephfs", "/a").await.is_ok());

    assert!(manager.disable_mirror("cephfs").await.is_ok());
    manager.handle_fs_map(fs_map(false)).await;

    let res = manager.add_dir("cephfs", "/b").await;
    assert_eq!(res.rc, -22);
    let store = cluster.pool(1);
    assert!(store.read_keys(mirror_store::MIRROR_OBJECT_NAME).await.is_err());
}

#[tokio::test]
async fn bootstrap_failure_is_retried_on_next_fs_map() {
    let cluster = FakeCluster::new(LOCAL_ID);
    let remotes = FakeRemote::new(REMOTE_ID);
    let mut manager =
        MirrorManager::new(cluster.clone(), remotes.clone(), FsPolicyConfig::default());
    // mirrored before enable ever ran: the object is missing, init aborts
    manager.handle_fs_map(fs_map(true)).await;
    assert_eq!(manager.add_dir("cephfs", "/a").await.rc, -22);

    cluster.pool(1).create_object(mirror_store::MIRROR_OBJECT_NAME).await.unwrap();
    manager.handle_fs_map(fs_map(true)).await;
    assert!(manager.add_dir("cephfs", "/a").await.is_ok());
    manager.shutdown().await;
}
