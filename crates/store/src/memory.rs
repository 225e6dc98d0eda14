// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store backend for tests.
//!
//! Models the pieces of the object store the engine leans on: omap-style
//! key/value objects, watch registrations as the worker liveness source,
//! wakeups on watcher churn, notify with a pluggable acknowledgment handler,
//! and a blocklist log. Failure injection flips reads, writes or fencing
//! into errors.

use crate::backend::{StoreBackend, StoreError, Watcher};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

type NotifyHandler = Box<dyn Fn(&[u8]) -> i32 + Send + Sync>;

#[derive(Default)]
struct Shared {
    objects: HashMap<String, BTreeMap<String, Vec<u8>>>,
    workers: BTreeMap<String, String>,
    subscribers: Vec<mpsc::Sender<()>>,
    notify_log: Vec<Vec<u8>>,
    blocklisted: Vec<String>,
    fail_reads: bool,
    fail_writes: bool,
    fail_blocklist: bool,
    notify_handler: Option<NotifyHandler>,
}

#[derive(Default)]
pub struct MemoryStore {
    shared: Mutex<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mirror-worker watch on the store and wake watchers.
    pub fn register_worker(&self, id: &str, addr: &str) {
        let mut shared = self.shared.lock();
        shared.workers.insert(id.to_string(), addr.to_string());
        Self::wake(&mut shared);
    }

    /// Drop a mirror-worker watch and wake watchers.
    pub fn deregister_worker(&self, id: &str) {
        let mut shared = self.shared.lock();
        shared.workers.remove(id);
        Self::wake(&mut shared);
    }

    /// Replace the notify acknowledgment handler (default acks 0).
    pub fn set_notify_handler(&self, handler: impl Fn(&[u8]) -> i32 + Send + Sync + 'static) {
        self.shared.lock().notify_handler = Some(Box::new(handler));
    }

    /// Every notification payload published so far, in order.
    pub fn notifications(&self) -> Vec<Vec<u8>> {
        self.shared.lock().notify_log.clone()
    }

    /// Addresses fenced so far, in order.
    pub fn blocklisted(&self) -> Vec<String> {
        self.shared.lock().blocklisted.clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.shared.lock().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }

    pub fn set_fail_blocklist(&self, fail: bool) {
        self.shared.lock().fail_blocklist = fail;
    }

    fn wake(shared: &mut Shared) {
        shared.subscribers.retain(|tx| match tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        });
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn create_object(&self, object: &str) -> Result<(), StoreError> {
        self.shared.lock().objects.entry(object.to_string()).or_default();
        Ok(())
    }

    async fn remove_object(&self, object: &str) -> Result<(), StoreError> {
        self.shared.lock().objects.remove(object);
        Ok(())
    }

    async fn read_keys(&self, object: &str) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let shared = self.shared.lock();
        if shared.fail_reads {
            return Err(StoreError::Unavailable(format!("{object}: injected read failure")));
        }
        shared
            .objects
            .get(object)
            .cloned()
            .ok_or_else(|| StoreError::Unavailable(format!("{object}: no such object")))
    }

    async fn write_keys(
        &self,
        object: &str,
        updates: BTreeMap<String, Vec<u8>>,
        removals: Vec<String>,
    ) -> Result<(), StoreError> {
        let mut shared = self.shared.lock();
        if shared.fail_writes {
            return Err(StoreError::Unavailable(format!("{object}: injected write failure")));
        }
        let keys = shared
            .objects
            .get_mut(object)
            .ok_or_else(|| StoreError::Unavailable(format!("{object}: no such object")))?;
        for (key, value) in updates {
            keys.insert(key, value);
        }
        for key in removals {
            keys.remove(&key);
        }
        Ok(())
    }

    async fn notify(&self, _object: &str, payload: Vec<u8>) -> Result<i32, StoreError> {
        let mut shared = self.shared.lock();
        shared.notify_log.push(payload.clone());
        Ok(shared.notify_handler.as_ref().map_or(0, |handler| handler(&payload)))
    }

    async fn list_watchers(&self, _object: &str) -> Result<Vec<Watcher>, StoreError> {
        let shared = self.shared.lock();
        Ok(shared
            .workers
            .iter()
            .map(|(id, addr)| Watcher { id: id.clone(), addr: addr.clone() })
            .collect())
    }

    async fn watch(&self, _object: &str) -> Result<mpsc::Receiver<()>, StoreError> {
        let (tx, rx) = mpsc::channel(8);
        self.shared.lock().subscribers.push(tx);
        Ok(rx)
    }

    async fn blocklist(&self, addr: &str) -> Result<(), StoreError> {
        let mut shared = self.shared.lock();
        if shared.fail_blocklist {
            return Err(StoreError::BlocklistFailed {
                addr: addr.to_string(),
                reason: "injected blocklist failure".to_string(),
            });
        }
        shared.blocklisted.push(addr.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
