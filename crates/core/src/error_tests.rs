// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    invalid = { MirrorError::InvalidArgument("x".into()), -22 },
    not_found = { MirrorError::NotFound("x".into()), -2 },
    exists = { MirrorError::AlreadyExists("x".into()), -17 },
    removal = { MirrorError::RemovalInProgress("x".into()), -11 },
    store = { MirrorError::StoreUnavailable("x".into()), -5 },
)]
fn rc_follows_negative_errno(err: MirrorError, rc: i32) {
    assert_eq!(err.rc(), rc);
}

#[test]
fn fence_failure_is_io() {
    let err = MirrorError::InstanceFenceFailed {
        addr: "10.0.0.1:6800".into(),
        reason: "denied".into(),
    };
    assert_eq!(err.rc(), -5);
    assert!(err.to_string().contains("10.0.0.1:6800"));
}

#[test]
fn command_result_from_error_carries_message() {
    let res = CommandResult::from(MirrorError::AlreadyExists(
        "directory /a is already tracked".into(),
    ));
    assert_eq!(res.rc, -17);
    assert_eq!(res.out, "");
    assert_eq!(res.err, "directory /a is already tracked");
    assert!(!res.is_ok());
}

#[test]
fn ok_empty_is_empty_json_object() {
    let res = CommandResult::ok_empty();
    assert_eq!(res.rc, 0);
    assert_eq!(res.out, "{}");
    assert!(res.is_ok());
}
