// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key codec for the well-known object.
//!
//! The object holds two logical maps behind key prefixes; values are
//! serde_json-encoded records, which load/store byte-stably.

use crate::backend::StoreError;
use mirror_core::{DirPath, DirectoryEntry, InstanceId, InstanceRecord};

/// Key prefix of the directory map.
pub const DIR_KEY_PREFIX: &str = "dir_map/";

/// Key prefix of the instance map.
pub const INSTANCE_KEY_PREFIX: &str = "instances/";

pub(crate) fn dir_key(path: &DirPath) -> String {
    format!("{DIR_KEY_PREFIX}{path}")
}

pub(crate) fn instance_key(id: &InstanceId) -> String {
    format!("{INSTANCE_KEY_PREFIX}{id}")
}

pub(crate) fn decode_dir_key(key: &str) -> Option<&str> {
    key.strip_prefix(DIR_KEY_PREFIX)
}

pub(crate) fn decode_instance_key(key: &str) -> Option<&str> {
    key.strip_prefix(INSTANCE_KEY_PREFIX)
}

pub(crate) fn encode_entry(entry: &DirectoryEntry) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(entry).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn decode_entry(key: &str, value: &[u8]) -> Result<DirectoryEntry, StoreError> {
    serde_json::from_slice(value).map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))
}

pub(crate) fn encode_record(record: &InstanceRecord) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn decode_record(key: &str, value: &[u8]) -> Result<InstanceRecord, StoreError> {
    serde_json::from_slice(value).map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))
}
