// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-filesystem policy controller.
//!
//! One owning task serializes every state mutation: management commands,
//! throttle ticks, instance deltas and completion events all land on the same
//! loop, so completions never race the batching pass. The completion channel
//! is the single serialization point every asynchronous result funnels
//! through.
//!
//! Durable writes are funneled through one FIFO per class (directory map,
//! instance map) with at most one write of each class outstanding.
//! `add_dir`/`remove_dir` are synchronous from the caller's viewpoint: the
//! reply fires when their first durable write completes.

use crate::policy::{Policy, StartedAction};
use crate::state::ActionType;
use crate::watcher::InstanceWatcher;
use indexmap::IndexSet;
use mirror_core::{DirPath, DirectoryEntry, InstanceId, InstanceRecord, MirrorError,
    MirrorResult, SystemClock};
use mirror_store::{Gateway, NotifyMode, StoreError};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Update-coordinator tick. Batches bursts of directory events without
/// user-visible latency.
pub const UPDATE_THROTTLE_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for one filesystem's policy engine.
#[derive(Debug, Clone)]
pub struct FsPolicyConfig {
    /// Throttle tick driving the update coordinator.
    pub throttle: Duration,
    /// Depth of the command and completion channels.
    pub channel_depth: usize,
}

impl Default for FsPolicyConfig {
    fn default() -> Self {
        Self { throttle: UPDATE_THROTTLE_INTERVAL, channel_depth: 64 }
    }
}

enum Command {
    AddDir { path: DirPath, reply: oneshot::Sender<MirrorResult<()>> },
    RemoveDir { path: DirPath, reply: oneshot::Sender<MirrorResult<()>> },
    Status { path: DirPath, reply: oneshot::Sender<MirrorResult<serde_json::Value>> },
    Summary { reply: oneshot::Sender<MirrorResult<serde_json::Value>> },
}

pub(crate) enum EngineEvent {
    DirWriteDone { request_id: Uuid, result: Result<(), StoreError> },
    InstanceWriteDone { request_id: Uuid, result: Result<(), StoreError> },
    PeerAck { path: DirPath, mode: NotifyMode, r: i32 },
    InstanceDelta {
        added: BTreeMap<InstanceId, String>,
        removed: BTreeMap<InstanceId, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirWriteKind {
    /// Tick batch; completions advance each contained path's FSM.
    Batch,
    /// First write of `add_dir` (unassigned entry).
    InitialAdd,
    /// First write of `remove_dir` (purge flag).
    Purge,
}

struct DirWriteJob {
    kind: DirWriteKind,
    updates: BTreeMap<DirPath, DirectoryEntry>,
    removals: Vec<DirPath>,
    reply: Option<oneshot::Sender<MirrorResult<()>>>,
}

struct InstanceWriteJob {
    added: BTreeMap<InstanceId, InstanceRecord>,
    removed: Vec<InstanceId>,
}

/// Counts outstanding durable writes and notifications; shutdown drains it
/// to zero before returning.
#[derive(Default)]
struct AsyncOpTracker {
    outstanding: usize,
}

impl AsyncOpTracker {
    fn start(&mut self) {
        self.outstanding += 1;
    }

    fn finish(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    fn is_idle(&self) -> bool {
        self.outstanding == 0
    }
}

/// Thread-safe facade over one filesystem's policy engine.
#[derive(Clone)]
pub struct FsPolicyHandle {
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    failed: Arc<AtomicBool>,
}

impl FsPolicyHandle {
    /// Track a directory. Returns once the first durable write completed.
    pub async fn add_dir(&self, path: DirPath) -> MirrorResult<()> {
        self.request(|reply| Command::AddDir { path, reply }).await
    }

    /// Untrack a directory. Returns once the purge flag is durable; the
    /// release/removal handshake continues in the background.
    pub async fn remove_dir(&self, path: DirPath) -> MirrorResult<()> {
        self.request(|reply| Command::RemoveDir { path, reply }).await
    }

    /// Status blob for one directory.
    pub async fn status(&self, path: DirPath) -> MirrorResult<serde_json::Value> {
        self.request(|reply| Command::Status { path, reply }).await
    }

    /// Distribution summary across instances.
    pub async fn summary(&self) -> MirrorResult<serde_json::Value> {
        self.request(|reply| Command::Summary { reply }).await
    }

    /// Whether the engine aborted on a fencing failure.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Stop accepting intents, cancel the timer, stop the instance watcher,
    /// and wait until every outstanding write and notification completed.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<MirrorResult<T>>) -> Command,
    ) -> MirrorResult<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).await.map_err(|_| MirrorError::ShuttingDown)?;
        rx.await.map_err(|_| MirrorError::ShuttingDown)?
    }
}

/// Bootstrap one filesystem's engine from persisted state and spawn its
/// owning task. Every loaded path is scheduled so the FSMs drive back to
/// steady state.
pub async fn spawn(
    gateway: Gateway,
    config: FsPolicyConfig,
    dir_mapping: BTreeMap<DirPath, DirectoryEntry>,
    instances: BTreeMap<InstanceId, InstanceRecord>,
) -> MirrorResult<FsPolicyHandle> {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_depth);
    let (event_tx, event_rx) = mpsc::channel(config.channel_depth);
    let cancel = CancellationToken::new();
    let failed = Arc::new(AtomicBool::new(false));

    let mut policy = Policy::new(SystemClock);
    let schedules = policy.init(dir_mapping, &instances);
    let seed: BTreeMap<InstanceId, String> =
        instances.iter().map(|(id, rec)| (id.clone(), rec.addr.clone())).collect();
    let watcher = InstanceWatcher::spawn(gateway.clone(), seed, event_tx.clone())
        .await
        .map_err(MirrorError::from)?;

    let actor = FsPolicy {
        gateway,
        config: config.clone(),
        policy,
        pending: schedules.into_iter().collect(),
        dir_jobs: VecDeque::new(),
        dir_inflight: None,
        instance_jobs: VecDeque::new(),
        instance_inflight: None,
        instance_backoff: false,
        requests: HashMap::new(),
        ops: AsyncOpTracker::default(),
        event_tx,
        watcher: Some(watcher),
        stopping: false,
        failed: failed.clone(),
    };
    let task = tokio::spawn(actor.run(cmd_rx, event_rx, cancel.clone()));
    Ok(FsPolicyHandle { cmd_tx, cancel, task: Arc::new(Mutex::new(Some(task))), failed })
}

struct FsPolicy {
    gateway: Gateway,
    config: FsPolicyConfig,
    policy: Policy<SystemClock>,
    /// Paths with pending intents, deduplicated, in insertion order.
    pending: IndexSet<DirPath>,
    dir_jobs: VecDeque<DirWriteJob>,
    dir_inflight: Option<DirWriteJob>,
    instance_jobs: VecDeque<InstanceWriteJob>,
    instance_inflight: Option<InstanceWriteJob>,
    /// A failed instance write waits for the next tick before retrying.
    instance_backoff: bool,
    /// Outstanding async requests, for logging and accounting.
    requests: HashMap<Uuid, &'static str>,
    ops: AsyncOpTracker,
    event_tx: mpsc::Sender<EngineEvent>,
    watcher: Option<InstanceWatcher>,
    stopping: bool,
    failed: Arc<AtomicBool>,
}

impl FsPolicy {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut event_rx: mpsc::Receiver<EngineEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = time::interval(self.config.throttle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !self.stopping => self.begin_shutdown().await,
                Some(event) = event_rx.recv() => self.handle_event(event).await,
                cmd = cmd_rx.recv(), if !self.stopping => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.begin_shutdown().await,
                },
                _ = ticker.tick(), if !self.stopping => self.process_pending(),
            }
            if self.stopping && self.drained() {
                break;
            }
        }
        debug!("policy engine drained");
    }

    fn drained(&self) -> bool {
        self.ops.is_idle()
            && self.dir_jobs.is_empty()
            && self.dir_inflight.is_none()
            && self.instance_jobs.is_empty()
            && self.instance_inflight.is_none()
    }

    async fn begin_shutdown(&mut self) {
        if self.stopping {
            return;
        }
        info!("shutting down policy engine");
        self.stopping = true;
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        // accepted intents still drain; only new ones are refused
        self.pump_dir_writes();
        self.pump_instance_writes();
    }

    fn schedule(&mut self, path: DirPath) {
        if !self.stopping {
            self.pending.insert(path);
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::AddDir { path, reply } => self.handle_add_dir(path, reply),
            Command::RemoveDir { path, reply } => self.handle_remove_dir(path, reply),
            Command::Status { path, reply } => {
                let _ = reply.send(self.policy.dir_status(&path));
            }
            Command::Summary { reply } => {
                let _ = reply.send(Ok(self.policy.instance_summary()));
            }
        }
    }

    fn handle_add_dir(&mut self, path: DirPath, reply: oneshot::Sender<MirrorResult<()>>) {
        if let Some(info) = self.policy.lookup(&path) {
            let err = if info.purging {
                MirrorError::RemovalInProgress(format!("remove in-progress for {path}"))
            } else {
                MirrorError::AlreadyExists(format!("directory {path} is already tracked"))
            };
            let _ = reply.send(Err(err));
            return;
        }
        info!(%path, "tracking directory");
        let entry = self.policy.add_dir(path.clone());
        let mut updates = BTreeMap::new();
        updates.insert(path, entry);
        self.dir_jobs.push_back(DirWriteJob {
            kind: DirWriteKind::InitialAdd,
            updates,
            removals: Vec::new(),
            reply: Some(reply),
        });
        self.pump_dir_writes();
    }

    fn handle_remove_dir(&mut self, path: DirPath, reply: oneshot::Sender<MirrorResult<()>>) {
        let err = match self.policy.lookup(&path) {
            None => Some(MirrorError::NotFound(format!("directory {path} is not tracked"))),
            Some(info) if info.purging => {
                Some(MirrorError::InvalidArgument(format!("directory {path} is under removal")))
            }
            Some(_) => None,
        };
        if let Some(err) = err {
            let _ = reply.send(Err(err));
            return;
        }
        info!(%path, "untracking directory");
        let Some(entry) = self.policy.start_remove(&path) else {
            let _ = reply.send(Err(MirrorError::NotFound(format!(
                "directory {path} is not tracked"
            ))));
            return;
        };
        let mut updates = BTreeMap::new();
        updates.insert(path, entry);
        self.dir_jobs.push_back(DirWriteJob {
            kind: DirWriteKind::Purge,
            updates,
            removals: Vec::new(),
            reply: Some(reply),
        });
        self.pump_dir_writes();
    }

    /// Throttled batching pass: drain pending paths, group map writes into
    /// one batch, dispatch one notification per acquire/release.
    fn process_pending(&mut self) {
        if self.instance_backoff {
            self.instance_backoff = false;
            self.pump_instance_writes();
        }
        if self.pending.is_empty() {
            return;
        }
        let paths: Vec<DirPath> = self.pending.drain(..).collect();
        let dir_busy = self.dir_inflight.is_some() || !self.dir_jobs.is_empty();
        let mut updates = BTreeMap::new();
        let mut removals = Vec::new();
        let mut notifies = Vec::new();
        let mut deferred = Vec::new();
        for path in paths {
            match self.policy.next_action(&path) {
                ActionType::None => {}
                ActionType::MapUpdate | ActionType::MapRemove if dir_busy => {
                    // one outstanding directory batch at a time
                    deferred.push(path);
                }
                _ => match self.policy.start_action(&path) {
                    StartedAction::None => {}
                    StartedAction::MapUpdate(entry) => {
                        updates.insert(path, entry);
                    }
                    StartedAction::MapRemove => removals.push(path),
                    StartedAction::Notify(mode) => notifies.push((path, mode)),
                },
            }
        }
        for path in deferred {
            self.pending.insert(path);
        }
        if !updates.is_empty() || !removals.is_empty() {
            self.dir_jobs.push_back(DirWriteJob {
                kind: DirWriteKind::Batch,
                updates,
                removals,
                reply: None,
            });
            self.pump_dir_writes();
        }
        for (path, mode) in notifies {
            self.send_notify(path, mode);
        }
    }

    fn pump_dir_writes(&mut self) {
        if self.dir_inflight.is_some() {
            return;
        }
        let Some(job) = self.dir_jobs.pop_front() else { return };
        let request_id = Uuid::new_v4();
        self.requests.insert(request_id, "update-dir-map");
        self.ops.start();
        debug!(
            %request_id,
            updates = job.updates.len(),
            removals = job.removals.len(),
            "applying directory map update"
        );
        let gateway = self.gateway.clone();
        let updates = job.updates.clone();
        let removals = job.removals.clone();
        let event_tx = self.event_tx.clone();
        self.dir_inflight = Some(job);
        tokio::spawn(async move {
            let result = gateway.apply_directory_update(&updates, &removals).await;
            let _ = event_tx.send(EngineEvent::DirWriteDone { request_id, result }).await;
        });
    }

    fn pump_instance_writes(&mut self) {
        if self.instance_inflight.is_some() || (self.instance_backoff && !self.stopping) {
            return;
        }
        let Some(job) = self.instance_jobs.pop_front() else { return };
        let request_id = Uuid::new_v4();
        self.requests.insert(request_id, "update-instance-map");
        self.ops.start();
        debug!(
            %request_id,
            added = job.added.len(),
            removed = job.removed.len(),
            "applying instance map update"
        );
        let gateway = self.gateway.clone();
        let added = job.added.clone();
        let removed = job.removed.clone();
        let event_tx = self.event_tx.clone();
        self.instance_inflight = Some(job);
        tokio::spawn(async move {
            let result = gateway.apply_instance_update(&added, &removed).await;
            let _ = event_tx.send(EngineEvent::InstanceWriteDone { request_id, result }).await;
        });
    }

    fn send_notify(&mut self, path: DirPath, mode: NotifyMode) {
        self.ops.start();
        debug!(%path, %mode, "notifying worker");
        let gateway = self.gateway.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let r = match gateway.notify_worker(&path, mode).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(%path, %mode, error = %e, "notification failed");
                    -(Errno::EIO as i32)
                }
            };
            let _ = event_tx.send(EngineEvent::PeerAck { path, mode, r }).await;
        });
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::DirWriteDone { request_id, result } => {
                self.handle_dir_write_done(request_id, result);
            }
            EngineEvent::InstanceWriteDone { request_id, result } => {
                self.handle_instance_write_done(request_id, result);
            }
            EngineEvent::PeerAck { path, mode, r } => self.handle_peer_ack(path, mode, r),
            EngineEvent::InstanceDelta { added, removed } => {
                self.handle_instance_delta(added, removed).await;
            }
        }
    }

    fn handle_dir_write_done(&mut self, request_id: Uuid, result: Result<(), StoreError>) {
        self.ops.finish();
        self.requests.remove(&request_id);
        let Some(job) = self.dir_inflight.take() else {
            warn!(%request_id, "directory write completed with no job in flight");
            return;
        };
        let err = match result {
            Ok(()) => None,
            Err(e) => {
                warn!(%request_id, error = %e, "directory map update failed");
                Some(MirrorError::from(e))
            }
        };
        let ok = err.is_none();
        match job.kind {
            DirWriteKind::InitialAdd => {
                for path in job.updates.keys() {
                    if ok {
                        self.policy.commit_add(path);
                        self.schedule(path.clone());
                    } else {
                        self.policy.revert_add(path);
                    }
                }
                if let Some(reply) = job.reply {
                    let _ = reply.send(err.map_or(Ok(()), Err));
                }
            }
            DirWriteKind::Purge => {
                for path in job.updates.keys() {
                    if ok {
                        self.policy.commit_remove_start(path);
                        self.schedule(path.clone());
                    } else {
                        self.policy.revert_remove_start(path);
                    }
                }
                if let Some(reply) = job.reply {
                    let _ = reply.send(err.map_or(Ok(()), Err));
                }
            }
            DirWriteKind::Batch => {
                if !self.stopping {
                    let paths: Vec<DirPath> =
                        job.updates.keys().cloned().chain(job.removals.iter().cloned()).collect();
                    for path in paths {
                        if self.policy.finish_map_write(&path, ok) {
                            self.schedule(path);
                        }
                    }
                }
            }
        }
        self.pump_dir_writes();
    }

    fn handle_instance_write_done(&mut self, request_id: Uuid, result: Result<(), StoreError>) {
        self.ops.finish();
        self.requests.remove(&request_id);
        let Some(job) = self.instance_inflight.take() else {
            warn!(%request_id, "instance write completed with no job in flight");
            return;
        };
        match result {
            Ok(()) => {
                if !self.stopping {
                    let mut schedules = Vec::new();
                    if !job.removed.is_empty() {
                        schedules.extend(self.policy.remove_instances(&job.removed));
                    }
                    if !job.added.is_empty() {
                        let added: BTreeMap<InstanceId, String> = job
                            .added
                            .iter()
                            .map(|(id, rec)| (id.clone(), rec.addr.clone()))
                            .collect();
                        schedules.extend(self.policy.add_instances(&added));
                    }
                    for path in schedules {
                        self.schedule(path);
                    }
                }
            }
            Err(e) => {
                warn!(%request_id, error = %e, "instance map update failed; retrying");
                self.instance_jobs.push_front(job);
                self.instance_backoff = true;
            }
        }
        self.pump_instance_writes();
    }

    fn handle_peer_ack(&mut self, path: DirPath, mode: NotifyMode, r: i32) {
        self.ops.finish();
        if self.stopping {
            return;
        }
        if r == 0 {
            debug!(%path, %mode, "worker acknowledged");
        } else {
            warn!(%path, %mode, r, "worker did not acknowledge");
        }
        if self.policy.finish_ack(&path, mode, r) {
            self.schedule(path);
        }
    }

    async fn handle_instance_delta(
        &mut self,
        added: BTreeMap<InstanceId, String>,
        removed: BTreeMap<InstanceId, String>,
    ) {
        if self.stopping {
            return;
        }
        // Fence departed instances before the instance-map mutation; their
        // directories are reassigned only in that write's completion.
        for (id, addr) in &removed {
            info!(%id, %addr, "blocklisting departed instance");
            if let Err(e) = self.gateway.blocklist(addr).await {
                error!(%addr, error = %e, "failed to fence instance; disabling engine");
                self.failed.store(true, Ordering::SeqCst);
                self.begin_shutdown().await;
                return;
            }
        }
        let added: BTreeMap<InstanceId, InstanceRecord> = added
            .into_iter()
            .map(|(id, addr)| (id, InstanceRecord::new(addr)))
            .collect();
        let removed: Vec<InstanceId> = removed.into_keys().collect();
        self.instance_jobs.push_back(InstanceWriteJob { added, removed });
        self.pump_instance_writes();
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
