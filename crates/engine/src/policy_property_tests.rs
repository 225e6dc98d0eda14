// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests: after any sequence of add/remove/instance-churn events,
//! driving the policy to quiescence restores the steady-state invariants.

use super::*;
use mirror_core::FakeClock;
use proptest::prelude::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
enum Op {
    AddDir(u8),
    RemoveDir(u8),
    Join(u8),
    Leave(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    (0u8..4, 0u8..5).prop_map(|(kind, idx)| match kind {
        0 => Op::AddDir(idx),
        1 => Op::RemoveDir(idx),
        2 => Op::Join(idx),
        _ => Op::Leave(idx),
    })
}

fn dir(idx: u8) -> DirPath {
    DirPath::normalize(&format!("/d{idx}")).unwrap()
}

fn worker(idx: u8) -> InstanceId {
    InstanceId::new(format!("inst-{idx}"))
}

/// Apply an op the way the controller would, with every durable write
/// succeeding immediately.
fn apply(policy: &mut Policy<FakeClock>, live: &mut BTreeSet<InstanceId>, op: Op) {
    match op {
        Op::AddDir(idx) => {
            let path = dir(idx);
            if policy.lookup(&path).is_none() {
                policy.add_dir(path.clone());
                policy.commit_add(&path);
            }
        }
        Op::RemoveDir(idx) => {
            let path = dir(idx);
            if policy.lookup(&path).is_some_and(|info| !info.purging)
                && policy.start_remove(&path).is_some()
            {
                policy.commit_remove_start(&path);
            }
        }
        Op::Join(idx) => {
            let id = worker(idx);
            if live.insert(id.clone()) {
                let mut added = BTreeMap::new();
                added.insert(id, format!("10.0.0.{idx}:6800"));
                policy.add_instances(&added);
            }
        }
        Op::Leave(idx) => {
            let id = worker(idx);
            if live.remove(&id) {
                policy.remove_instances(&[id]);
            }
        }
    }
}

/// Run every startable action to completion (all writes and acks succeed)
/// until no directory has anything left to do.
fn drive_to_quiescence(policy: &mut Policy<FakeClock>) {
    for _ in 0..128 {
        let mut progressed = false;
        for idx in 0..5u8 {
            let path = dir(idx);
            loop {
                match policy.start_action(&path) {
                    StartedAction::None => break,
                    StartedAction::MapUpdate(_) | StartedAction::MapRemove => {
                        policy.finish_map_write(&path, true);
                    }
                    StartedAction::Notify(mode) => {
                        policy.finish_ack(&path, mode, 0);
                    }
                }
                progressed = true;
            }
        }
        if !progressed {
            return;
        }
    }
    panic!("policy failed to reach quiescence");
}

proptest! {
    #[test]
    fn churn_converges_to_steady_state(ops in prop::collection::vec(op_strategy(), 0..48)) {
        let mut policy = Policy::new(FakeClock::new());
        let mut live = BTreeSet::new();
        for op in ops {
            apply(&mut policy, &mut live, op);
        }
        drive_to_quiescence(&mut policy);

        let summary = policy.instance_summary();
        let mut tracked = 0usize;
        let mut assigned_total = 0usize;
        for idx in 0..5u8 {
            let path = dir(idx);
            let Some(info) = policy.lookup(&path) else { continue };
            tracked += 1;
            // purged directories drain completely at quiescence
            prop_assert!(!info.purging, "{path} still purging at quiescence");
            if live.is_empty() {
                prop_assert_eq!(info.instance_id, None);
            } else {
                // every tracked directory is acquired by some live instance
                let holder = info.instance_id.clone();
                prop_assert!(holder.as_ref().is_some_and(|id| live.contains(id)),
                    "{} assigned to {:?}, live = {:?}", path, holder, live);
                prop_assert_eq!(info.state, State::Acquired);
                assigned_total += 1;
            }
        }

        // summary counts equal the multiset of assignments
        prop_assert_eq!(summary["directory_count"].as_u64(), Some(tracked as u64));
        let counted: u64 = live
            .iter()
            .filter_map(|id| summary["instances"][id.as_str()]["directory_count"].as_u64())
            .sum();
        prop_assert_eq!(counted, assigned_total as u64);
    }
}
