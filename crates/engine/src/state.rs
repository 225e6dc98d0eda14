// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-directory state machine.
//!
//! Every tracked directory advances through these states, driven by the
//! update coordinator: a started action corresponds to exactly one pending
//! state, and each completion (durable write or worker acknowledgment) maps
//! onto one transition. Transitions are total: any completion arriving for a
//! state it does not belong to leaves the state alone so the newer intent's
//! own completion can drive it.

use mirror_store::NotifyMode;

/// FSM state of a tracked directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Tracked, waiting for an assignment decision.
    Idle,
    /// Durable mapping write outstanding.
    PendingMap,
    /// Mapped; acquire handshake with the assigned instance outstanding.
    PendingAcquire,
    /// Steady state: the assigned instance mirrors the directory.
    Acquired,
    /// Release handshake with the previously assigned instance outstanding.
    PendingRelease,
    /// Durable purge-flag write outstanding (removal started).
    PendingPurgeMap,
    /// Durable map-removal write outstanding.
    PendingRemove,
    /// Terminal: entry evicted.
    Gone,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Gone)
    }
}

mirror_core::simple_display! {
    State {
        Idle => "idle",
        PendingMap => "mapping",
        PendingAcquire => "acquiring",
        Acquired => "acquired",
        PendingRelease => "releasing",
        PendingPurgeMap => "purging",
        PendingRemove => "removing",
        Gone => "gone",
    }
}

/// Next action the policy wants for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Nothing to do; the FSM is at its desired state.
    None,
    /// The in-memory decision differs from the persisted mapping.
    MapUpdate,
    /// The entry should be purged from persistent state.
    MapRemove,
    /// Ask the assigned instance to start mirroring.
    Acquire,
    /// Ask the previously assigned instance to stop.
    Release,
}

mirror_core::simple_display! {
    ActionType {
        None => "none",
        MapUpdate => "map_update",
        MapRemove => "map_remove",
        Acquire => "acquire",
        Release => "release",
    }
}

/// What the transition functions need to know about an entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryView {
    pub purging: bool,
    pub assigned: bool,
    /// Assigned instance is in the live set.
    pub target_live: bool,
}

/// Result of applying a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub next: State,
    /// Whether the path should be re-enqueued (progress possible now).
    pub reschedule: bool,
}

fn to(next: State, reschedule: bool) -> Transition {
    Transition { next, reschedule }
}

/// Advance after a durable directory-map write completed.
pub(crate) fn after_map_write(state: State, ok: bool, view: EntryView) -> Transition {
    match (state, ok) {
        (State::PendingMap, true) if view.assigned => to(State::PendingAcquire, true),
        (State::PendingMap, true) => to(State::Idle, true),
        (State::PendingMap, false) => to(State::Idle, true),
        (State::PendingRemove, true) => to(State::Gone, false),
        (State::PendingRemove, false) => to(State::PendingRemove, true),
        // A purge overtook this write; its own completion drives the FSM.
        (other, _) => to(other, false),
    }
}

/// Advance after a worker acknowledged (or timed out on) a notification.
pub(crate) fn after_ack(state: State, mode: NotifyMode, r: i32, view: EntryView) -> Transition {
    match (state, mode) {
        (State::PendingAcquire, NotifyMode::Acquire) if r == 0 && view.target_live => {
            to(State::Acquired, false)
        }
        // Acquired from an instance that departed mid-handshake: drain it.
        (State::PendingAcquire, NotifyMode::Acquire) if r == 0 => to(State::PendingRelease, true),
        (State::PendingAcquire, NotifyMode::Acquire) => to(State::PendingAcquire, true),
        (State::PendingRelease, NotifyMode::Release) if view.target_live && r != 0 => {
            to(State::PendingRelease, true)
        }
        // Released (or the holder is fenced): purge continues, otherwise remap.
        (State::PendingRelease, NotifyMode::Release) if view.purging => {
            to(State::PendingRemove, true)
        }
        (State::PendingRelease, NotifyMode::Release) => to(State::Idle, true),
        // Stale acquire ack racing a newer release intent.
        (State::PendingRelease, NotifyMode::Acquire) => to(State::PendingRelease, true),
        (other, _) => to(other, false),
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
