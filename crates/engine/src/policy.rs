// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory map and assignment policy.
//!
//! `Policy` is the in-memory authoritative view of every tracked directory:
//! its assignment intent, its FSM state, and the staged-but-not-yet-durable
//! write for it. The update coordinator peeks with [`Policy::next_action`],
//! commits with [`Policy::start_action`], and routes completions back through
//! [`Policy::finish_map_write`] / [`Policy::finish_ack`].
//!
//! Assignment is deterministic least-loaded: the live instance with the
//! fewest assigned directories wins, ties broken by the smallest instance id.
//! Purging entries are never reassigned.

use crate::state::{after_ack, after_map_write, ActionType, EntryView, State};
use mirror_core::{Clock, DirPath, DirectoryEntry, InstanceId, InstanceRecord, MirrorError,
    MirrorResult, SystemClock};
use mirror_store::NotifyMode;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-directory bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct DirState {
    pub state: State,
    /// Assignment intent; `None` while unassigned.
    pub instance: Option<InstanceId>,
    /// Previous assignment, kept while an assignment write is in flight.
    prev_instance: Option<Option<InstanceId>>,
    pub mapped_time: u64,
    pub purging: bool,
    pub version: u64,
    /// An assignment has been durably committed at least once; later
    /// persisted changes bump the version.
    ever_assigned: bool,
    /// State to restore if the purge-flag write fails.
    resume_state: Option<State>,
    pub notify_inflight: bool,
    pub write_inflight: bool,
}

impl DirState {
    fn view(&self, live: bool) -> EntryView {
        EntryView {
            purging: self.purging,
            assigned: self.instance.is_some(),
            target_live: live,
        }
    }
}

/// Read-only lookup result for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LookupInfo {
    pub instance_id: Option<InstanceId>,
    pub mapped_time: u64,
    pub purging: bool,
    pub state: State,
}

/// A committed action, carrying the data the coordinator dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StartedAction {
    None,
    MapUpdate(DirectoryEntry),
    MapRemove,
    Notify(NotifyMode),
}

pub(crate) struct Policy<C: Clock = SystemClock> {
    dirs: BTreeMap<DirPath, DirState>,
    /// Live healthy instances: id → network address.
    instances: BTreeMap<InstanceId, String>,
    clock: C,
}

impl<C: Clock> Policy<C> {
    pub fn new(clock: C) -> Self {
        Self { dirs: BTreeMap::new(), instances: BTreeMap::new(), clock }
    }

    /// Seed from persisted state. Returns every loaded path so the caller can
    /// drive each one back to steady state.
    pub fn init(
        &mut self,
        dir_mapping: BTreeMap<DirPath, DirectoryEntry>,
        instances: &BTreeMap<InstanceId, InstanceRecord>,
    ) -> Vec<DirPath> {
        self.instances =
            instances.iter().map(|(id, rec)| (id.clone(), rec.addr.clone())).collect();
        let mut schedules = Vec::new();
        for (path, entry) in dir_mapping {
            let known = entry
                .instance_id
                .as_ref()
                .is_some_and(|id| self.instances.contains_key(id));
            let state = if entry.purging {
                if entry.is_assigned() { State::PendingRelease } else { State::PendingRemove }
            } else if known {
                // Re-issue the acquire; workers treat a duplicate as acked.
                State::PendingAcquire
            } else {
                State::Idle
            };
            // An instance absent from the persisted instance map was fenced
            // before its removal was committed; no release is owed to it.
            let instance = if known || entry.purging { entry.instance_id.clone() } else { None };
            debug!(%path, %state, "seeded directory");
            self.dirs.insert(
                path.clone(),
                DirState {
                    state,
                    instance,
                    prev_instance: None,
                    mapped_time: entry.mapped_time,
                    purging: entry.purging,
                    version: entry.version,
                    ever_assigned: entry.is_assigned(),
                    resume_state: None,
                    notify_inflight: false,
                    write_inflight: false,
                },
            );
            schedules.push(path);
        }
        schedules
    }

    pub fn lookup(&self, path: &DirPath) -> Option<LookupInfo> {
        self.dirs.get(path).map(|st| LookupInfo {
            instance_id: st.instance.clone(),
            mapped_time: st.mapped_time,
            purging: st.purging,
            state: st.state,
        })
    }

    /// Track a new directory. Returns the unassigned entry for the first
    /// durable write.
    pub fn add_dir(&mut self, path: DirPath) -> DirectoryEntry {
        let entry = DirectoryEntry::unassigned();
        self.dirs.insert(
            path,
            DirState {
                state: State::PendingMap,
                instance: None,
                prev_instance: None,
                mapped_time: 0,
                purging: false,
                version: entry.version,
                ever_assigned: false,
                resume_state: None,
                notify_inflight: false,
                write_inflight: true,
            },
        );
        entry
    }

    /// The first durable write for an added directory succeeded.
    pub fn commit_add(&mut self, path: &DirPath) {
        if let Some(st) = self.dirs.get_mut(path) {
            st.write_inflight = false;
            st.state = State::Idle;
        }
    }

    /// The first durable write for an added directory failed; forget it.
    pub fn revert_add(&mut self, path: &DirPath) {
        self.dirs.remove(path);
    }

    /// Start removing a directory. Returns the purge-flagged entry for the
    /// durable write.
    pub fn start_remove(&mut self, path: &DirPath) -> Option<DirectoryEntry> {
        let st = self.dirs.get_mut(path)?;
        st.resume_state = Some(st.state);
        st.purging = true;
        st.version += 1;
        st.state = State::PendingPurgeMap;
        st.write_inflight = true;
        Some(DirectoryEntry {
            version: st.version,
            instance_id: st.instance.clone(),
            mapped_time: st.mapped_time,
            purging: true,
        })
    }

    /// The purge-flag write succeeded; head for release or removal.
    pub fn commit_remove_start(&mut self, path: &DirPath) {
        if let Some(st) = self.dirs.get_mut(path) {
            st.write_inflight = false;
            st.resume_state = None;
            st.state =
                if st.instance.is_some() { State::PendingRelease } else { State::PendingRemove };
        }
    }

    /// The purge-flag write failed; the directory stays tracked.
    pub fn revert_remove_start(&mut self, path: &DirPath) {
        if let Some(st) = self.dirs.get_mut(path) {
            st.write_inflight = false;
            st.purging = false;
            st.state = st.resume_state.take().unwrap_or(State::Idle);
        }
    }

    /// Instances joined. Returns paths that can now make progress.
    pub fn add_instances(&mut self, added: &BTreeMap<InstanceId, String>) -> Vec<DirPath> {
        for (id, addr) in added {
            info!(%id, %addr, "instance joined");
            self.instances.insert(id.clone(), addr.clone());
        }
        self.dirs
            .iter()
            .filter(|(_, st)| st.state == State::Idle && !st.purging)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Instances departed (already fenced). Every directory they held enters
    /// release-then-reacquire; purging directories keep draining.
    pub fn remove_instances(&mut self, removed: &[InstanceId]) -> Vec<DirPath> {
        for id in removed {
            info!(%id, "instance departed");
            self.instances.remove(id);
        }
        let mut schedules = Vec::new();
        for (path, st) in &mut self.dirs {
            let held = st.instance.as_ref().is_some_and(|id| removed.contains(id));
            if !held {
                continue;
            }
            match st.state {
                State::Acquired | State::PendingAcquire => {
                    st.state = State::PendingRelease;
                    schedules.push(path.clone());
                }
                State::PendingRelease => schedules.push(path.clone()),
                State::Idle => {
                    st.instance = None;
                    schedules.push(path.clone());
                }
                // Write completions route these through the release path.
                State::PendingMap
                | State::PendingPurgeMap
                | State::PendingRemove
                | State::Gone => {}
            }
        }
        schedules
    }

    fn is_live(&self, id: &InstanceId) -> bool {
        self.instances.contains_key(id)
    }

    /// Peek at the next action for a path without committing anything.
    pub fn next_action(&self, path: &DirPath) -> ActionType {
        let Some(st) = self.dirs.get(path) else { return ActionType::None };
        match st.state {
            State::Idle => {
                if st.purging {
                    ActionType::None
                } else if st.instance.as_ref().is_some_and(|id| self.is_live(id)) {
                    ActionType::Acquire
                } else if !self.instances.is_empty() {
                    ActionType::MapUpdate
                } else {
                    ActionType::None
                }
            }
            State::PendingMap | State::PendingPurgeMap | State::Gone => ActionType::None,
            State::PendingAcquire => {
                if st.notify_inflight {
                    ActionType::None
                } else if st.instance.as_ref().is_some_and(|id| self.is_live(id)) {
                    ActionType::Acquire
                } else {
                    ActionType::Release
                }
            }
            State::Acquired => {
                if st.instance.as_ref().is_some_and(|id| self.is_live(id)) {
                    ActionType::None
                } else {
                    ActionType::Release
                }
            }
            State::PendingRelease => {
                if st.notify_inflight {
                    ActionType::None
                } else {
                    ActionType::Release
                }
            }
            State::PendingRemove => {
                if st.write_inflight {
                    ActionType::None
                } else {
                    ActionType::MapRemove
                }
            }
        }
    }

    /// Commit the next action for a path and stage its data.
    pub fn start_action(&mut self, path: &DirPath) -> StartedAction {
        match self.next_action(path) {
            ActionType::None => StartedAction::None,
            ActionType::MapUpdate => {
                let chosen = self.choose_instance();
                let now = self.clock.epoch_ms();
                let Some(st) = self.dirs.get_mut(path) else { return StartedAction::None };
                let Some(chosen) = chosen else { return StartedAction::None };
                st.prev_instance = Some(st.instance.take());
                st.instance = Some(chosen);
                if st.ever_assigned {
                    st.version += 1;
                }
                st.mapped_time = now;
                st.state = State::PendingMap;
                st.write_inflight = true;
                if let Some(id) = &st.instance {
                    debug!(%path, instance = %id, "staged mapping");
                }
                StartedAction::MapUpdate(DirectoryEntry {
                    version: st.version,
                    instance_id: st.instance.clone(),
                    mapped_time: st.mapped_time,
                    purging: st.purging,
                })
            }
            ActionType::MapRemove => {
                let Some(st) = self.dirs.get_mut(path) else { return StartedAction::None };
                st.write_inflight = true;
                StartedAction::MapRemove
            }
            ActionType::Acquire => {
                let Some(st) = self.dirs.get_mut(path) else { return StartedAction::None };
                st.state = State::PendingAcquire;
                st.notify_inflight = true;
                StartedAction::Notify(NotifyMode::Acquire)
            }
            ActionType::Release => {
                let Some(st) = self.dirs.get_mut(path) else { return StartedAction::None };
                st.state = State::PendingRelease;
                st.notify_inflight = true;
                StartedAction::Notify(NotifyMode::Release)
            }
        }
    }

    /// A durable directory write for this path completed. Returns whether the
    /// path should be re-enqueued.
    pub fn finish_map_write(&mut self, path: &DirPath, ok: bool) -> bool {
        let live = self
            .dirs
            .get(path)
            .and_then(|st| st.instance.as_ref())
            .is_some_and(|id| self.instances.contains_key(id));
        let Some(st) = self.dirs.get_mut(path) else { return false };
        st.write_inflight = false;
        let t = after_map_write(st.state, ok, st.view(live));
        if st.state == State::PendingMap {
            if ok {
                st.prev_instance = None;
                st.ever_assigned |= st.instance.is_some();
            } else if let Some(prev) = st.prev_instance.take() {
                st.instance = prev;
            }
        }
        if t.next == State::Gone {
            info!(%path, "directory purged");
            self.dirs.remove(path);
            return false;
        }
        st.state = t.next;
        t.reschedule
    }

    /// A worker acknowledgment for this path arrived. Returns whether the
    /// path should be re-enqueued.
    pub fn finish_ack(&mut self, path: &DirPath, mode: NotifyMode, r: i32) -> bool {
        let live = self
            .dirs
            .get(path)
            .and_then(|st| st.instance.clone())
            .is_some_and(|id| self.instances.contains_key(&id));
        let Some(st) = self.dirs.get_mut(path) else { return false };
        st.notify_inflight = false;
        let t = after_ack(st.state, mode, r, st.view(live));
        if st.state == State::PendingRelease && mode == NotifyMode::Release && t.next == State::Idle
        {
            // Released for reassignment: drop the old holder.
            st.instance = None;
        }
        if st.state != t.next {
            debug!(%path, from = %st.state, to = %t.next, r, "state advanced");
        }
        st.state = t.next;
        t.reschedule
    }

    /// Deterministic least-loaded pick among live instances.
    fn choose_instance(&self) -> Option<InstanceId> {
        let mut counts: BTreeMap<&InstanceId, usize> =
            self.instances.keys().map(|id| (id, 0)).collect();
        for st in self.dirs.values() {
            if let Some(id) = &st.instance {
                if let Some(count) = counts.get_mut(id) {
                    *count += 1;
                }
            }
        }
        counts
            .into_iter()
            .min_by_key(|(id, count)| (*count, (*id).clone()))
            .map(|(id, _)| id.clone())
    }

    /// Read-only status blob for one directory.
    pub fn dir_status(&self, path: &DirPath) -> MirrorResult<serde_json::Value> {
        let st = self
            .dirs
            .get(path)
            .ok_or_else(|| MirrorError::NotFound(format!("directory {path} is not tracked")))?;
        Ok(json!({
            "state": st.state.to_string(),
            "instance_id": st.instance.as_ref().map(|id| id.as_str()),
            "mapped_time": st.mapped_time,
            "purging": st.purging,
        }))
    }

    /// Distribution summary: per-instance directory counts.
    pub fn instance_summary(&self) -> serde_json::Value {
        let mut counts: BTreeMap<&InstanceId, usize> =
            self.instances.keys().map(|id| (id, 0)).collect();
        let mut unassigned = 0usize;
        for st in self.dirs.values() {
            match &st.instance {
                Some(id) if counts.contains_key(id) => {
                    if let Some(count) = counts.get_mut(id) {
                        *count += 1;
                    }
                }
                _ => unassigned += 1,
            }
        }
        let instances: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|(id, count)| {
                let addr = self.instances.get(id).cloned().unwrap_or_default();
                (id.to_string(), json!({"addr": addr, "directory_count": count}))
            })
            .collect();
        json!({
            "directory_count": self.dirs.len(),
            "unassigned_directory_count": unassigned,
            "instances": instances,
        })
    }

    #[cfg(test)]
    pub fn entry_state(&self, path: &DirPath) -> Option<State> {
        self.dirs.get(path).map(|st| st.state)
    }

    #[cfg(test)]
    pub fn assigned_instance(&self, path: &DirPath) -> Option<InstanceId> {
        self.dirs.get(path).and_then(|st| st.instance.clone())
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "policy_property_tests.rs"]
mod property_tests;
