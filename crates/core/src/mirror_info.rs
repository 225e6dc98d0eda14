// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mirror identity stamp and peer cluster spec.
//!
//! The stamp lives in the `ceph.mirror.info` extended attribute on the remote
//! filesystem root; the value format is `cluster_id=<uuid> fs_id=<int>`.

use crate::error::{MirrorError, MirrorResult};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Extended attribute carrying the mirror stamp on a remote root.
pub const MIRROR_INFO_XATTR: &str = "ceph.mirror.info";

/// Identity of the cluster/filesystem mirroring a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorInfo {
    pub cluster_id: Uuid,
    pub fs_id: u64,
}

impl fmt::Display for MirrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster_id={} fs_id={}", self.cluster_id, self.fs_id)
    }
}

impl FromStr for MirrorInfo {
    type Err = MirrorError;

    fn from_str(s: &str) -> MirrorResult<Self> {
        let malformed = || MirrorError::InvalidArgument(format!("malformed mirror info {s:?}"));
        let (cluster, fs) = s.split_once(' ').ok_or_else(malformed)?;
        let cluster_id = cluster
            .strip_prefix("cluster_id=")
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(malformed)?;
        let fs_id = fs
            .strip_prefix("fs_id=")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(malformed)?;
        Ok(Self { cluster_id, fs_id })
    }
}

/// Parsed `client.<name>@<cluster>` peer spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub client_name: String,
    pub cluster_name: String,
}

impl fmt::Display for PeerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client.{}@{}", self.client_name, self.cluster_name)
    }
}

impl FromStr for PeerSpec {
    type Err = MirrorError;

    fn from_str(spec: &str) -> MirrorResult<Self> {
        let invalid = || MirrorError::InvalidArgument(format!("invalid cluster spec {spec}"));
        let (client_id, cluster_name) = spec.split_once('@').ok_or_else(invalid)?;
        let (_, client_name) = client_id.split_once('.').ok_or_else(invalid)?;
        if client_name.is_empty() || cluster_name.is_empty() || client_name.contains('.') {
            return Err(invalid());
        }
        Ok(Self {
            client_name: client_name.to_string(),
            cluster_name: cluster_name.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "mirror_info_tests.rs"]
mod tests;
