// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn view(purging: bool, assigned: bool, target_live: bool) -> EntryView {
    EntryView { purging, assigned, target_live }
}

#[yare::parameterized(
    map_ok_assigned = { State::PendingMap, true, view(false, true, true), State::PendingAcquire, true },
    map_ok_unassigned = { State::PendingMap, true, view(false, false, false), State::Idle, true },
    map_failed = { State::PendingMap, false, view(false, true, true), State::Idle, true },
    remove_ok = { State::PendingRemove, true, view(true, false, false), State::Gone, false },
    remove_failed = { State::PendingRemove, false, view(true, false, false), State::PendingRemove, true },
    raced_by_purge = { State::PendingPurgeMap, true, view(true, true, true), State::PendingPurgeMap, false },
    stale_on_acquired = { State::Acquired, false, view(false, true, true), State::Acquired, false },
)]
fn map_write_transitions(state: State, ok: bool, view: EntryView, next: State, resched: bool) {
    let t = after_map_write(state, ok, view);
    assert_eq!(t.next, next);
    assert_eq!(t.reschedule, resched);
}

#[yare::parameterized(
    acquire_acked = { State::PendingAcquire, NotifyMode::Acquire, 0, view(false, true, true), State::Acquired, false },
    acquire_acked_dead = { State::PendingAcquire, NotifyMode::Acquire, 0, view(false, true, false), State::PendingRelease, true },
    acquire_nacked = { State::PendingAcquire, NotifyMode::Acquire, -110, view(false, true, true), State::PendingAcquire, true },
    release_acked_remap = { State::PendingRelease, NotifyMode::Release, 0, view(false, true, true), State::Idle, true },
    release_acked_purge = { State::PendingRelease, NotifyMode::Release, 0, view(true, true, true), State::PendingRemove, true },
    release_timeout_dead = { State::PendingRelease, NotifyMode::Release, -110, view(false, true, false), State::Idle, true },
    release_nacked_live = { State::PendingRelease, NotifyMode::Release, -5, view(false, true, true), State::PendingRelease, true },
    stale_acquire_ack = { State::PendingRelease, NotifyMode::Acquire, 0, view(false, true, true), State::PendingRelease, true },
    stale_ack_on_purge = { State::PendingPurgeMap, NotifyMode::Acquire, 0, view(true, true, true), State::PendingPurgeMap, false },
)]
fn ack_transitions(
    state: State,
    mode: NotifyMode,
    r: i32,
    view: EntryView,
    next: State,
    resched: bool,
) {
    let t = after_ack(state, mode, r, view);
    assert_eq!(t.next, next);
    assert_eq!(t.reschedule, resched);
}

#[test]
fn gone_is_the_only_terminal_state() {
    for state in [
        State::Idle,
        State::PendingMap,
        State::PendingAcquire,
        State::Acquired,
        State::PendingRelease,
        State::PendingPurgeMap,
        State::PendingRemove,
    ] {
        assert!(!state.is_terminal(), "{state} must not be terminal");
    }
    assert!(State::Gone.is_terminal());
}

#[test]
fn display_names_are_stable() {
    assert_eq!(State::PendingAcquire.to_string(), "acquiring");
    assert_eq!(State::PendingPurgeMap.to_string(), "purging");
    assert_eq!(ActionType::MapUpdate.to_string(), "map_update");
}
