// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mirror-store: gateway to the shared object store.
//!
//! One well-known object per filesystem holds the persisted directory map and
//! instance map; its notify channel is the worker pub/sub link, and its watch
//! registrations are the worker liveness source.

mod backend;
mod gateway;
mod keys;
mod notify;

#[cfg(any(test, feature = "test-support"))]
mod memory;

pub use backend::{StoreBackend, StoreError, Watcher, MIRROR_OBJECT_NAME};
pub use gateway::Gateway;
pub use keys::{DIR_KEY_PREFIX, INSTANCE_KEY_PREFIX};
pub use notify::{NotifyMessage, NotifyMode};

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryStore;
