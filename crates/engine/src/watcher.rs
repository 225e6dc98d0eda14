// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance watcher: live view of the mirror-worker set.
//!
//! Workers hold a watch on the well-known object; the watcher turns watcher
//! churn into ordered `(added, removed)` deltas for the engine. Wakeup bursts
//! are coalesced into a single observation.

use crate::controller::EngineEvent;
use mirror_core::InstanceId;
use mirror_store::{Gateway, StoreError};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Delta = (BTreeMap<InstanceId, String>, BTreeMap<InstanceId, String>);

pub(crate) struct InstanceWatcher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl InstanceWatcher {
    /// Start observing. `seed` is the persisted instance map: workers that
    /// died while the engine was down show up as removed on the first
    /// observation.
    pub(crate) async fn spawn(
        gateway: Gateway,
        seed: BTreeMap<InstanceId, String>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Self, StoreError> {
        let wakeups = gateway.watch().await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(gateway, seed, events, wakeups, cancel.clone()));
        Ok(Self { cancel, task })
    }

    /// Stop observing. After this returns no further deltas are delivered.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
        debug!("instance watcher stopped");
    }
}

async fn run(
    gateway: Gateway,
    mut view: BTreeMap<InstanceId, String>,
    events: mpsc::Sender<EngineEvent>,
    mut wakeups: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    // Reconcile the persisted seed against the live set immediately.
    if deliver(&gateway, &mut view, &events, &cancel).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            wake = wakeups.recv() => match wake {
                Some(()) => {
                    // coalesce rapid successive wakeups into one observation
                    while wakeups.try_recv().is_ok() {}
                    if deliver(&gateway, &mut view, &events, &cancel).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Observe once and deliver the delta, if any. Err means shutdown.
async fn deliver(
    gateway: &Gateway,
    view: &mut BTreeMap<InstanceId, String>,
    events: &mpsc::Sender<EngineEvent>,
    cancel: &CancellationToken,
) -> Result<(), ()> {
    let Some((added, removed)) = observe(gateway, view).await else {
        return Ok(());
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(()),
        sent = events.send(EngineEvent::InstanceDelta { added, removed }) => {
            sent.map_err(|_| ())
        }
    }
}

async fn observe(
    gateway: &Gateway,
    view: &mut BTreeMap<InstanceId, String>,
) -> Option<Delta> {
    let live = match gateway.live_instances().await {
        Ok(live) => live,
        Err(e) => {
            warn!(error = %e, "failed to observe instance set");
            return None;
        }
    };
    let added: BTreeMap<InstanceId, String> = live
        .iter()
        .filter(|(id, _)| !view.contains_key(*id))
        .map(|(id, addr)| (id.clone(), addr.clone()))
        .collect();
    let removed: BTreeMap<InstanceId, String> = view
        .iter()
        .filter(|(id, _)| !live.contains_key(*id))
        .map(|(id, addr)| (id.clone(), addr.clone()))
        .collect();
    if added.is_empty() && removed.is_empty() {
        return None;
    }
    info!(added = added.len(), removed = removed.len(), "instance set changed");
    *view = live;
    Some((added, removed))
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
