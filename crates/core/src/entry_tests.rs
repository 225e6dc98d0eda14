// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn unassigned_entry_shape() {
    let entry = DirectoryEntry::unassigned();
    assert_eq!(entry.version, 1);
    assert!(!entry.is_assigned());
    assert_eq!(entry.mapped_time, 0);
    assert!(!entry.purging);
}

#[test]
fn serde_omits_defaults() {
    let entry = DirectoryEntry::unassigned();
    let json = serde_json::to_string(&entry).unwrap();
    assert_eq!(json, r#"{"version":1,"mapped_time":0}"#);
}

#[test]
fn serde_round_trip_assigned_purging() {
    let entry = DirectoryEntry {
        version: 3,
        instance_id: Some(InstanceId::new("inst-A")),
        mapped_time: 42_000,
        purging: true,
    };
    let bytes = serde_json::to_vec(&entry).unwrap();
    let back: DirectoryEntry = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(back, entry);
    assert!(back.assigned_to(&InstanceId::new("inst-A")));
}

#[test]
fn missing_fields_deserialize_to_defaults() {
    let back: DirectoryEntry = serde_json::from_str(r#"{"version":1}"#).unwrap();
    assert_eq!(back, DirectoryEntry { version: 1, instance_id: None, mapped_time: 0, purging: false });
}
