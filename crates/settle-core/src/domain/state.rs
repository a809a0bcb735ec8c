//! Task state machine.

use serde::{Deserialize, Serialize};

/// Scheduling state of one submitted action.
///
/// State transitions:
/// - None -> Blocked | Pending | Cancelled
/// - Blocked -> Pending | Cancelled
/// - Pending -> Complete | PartialComplete | Error
/// - PartialComplete -> Complete (promotion once an earlier item settles)
///
/// `PartialComplete` is provisional: the caller already has the value, but a
/// still-running earlier item may yet produce the authoritative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Submitted, not yet looked at by a drain.
    None,

    /// Not yet eligible to start; waiting on a named relationship.
    Blocked,

    /// Action is running.
    Pending,

    /// Settled with the authoritative value.
    Complete,

    /// Settled with a provisional value.
    PartialComplete,

    /// Action failed.
    Error,

    /// Denied execution because a dependency failed or was cancelled.
    Cancelled,
}

impl TaskState {
    /// Not started yet (still in the waiting collection).
    pub const WAITING: &'static [TaskState] = &[TaskState::None, TaskState::Blocked];

    /// Ended without a value.
    pub const FAILED: &'static [TaskState] = &[TaskState::Error, TaskState::Cancelled];

    /// Terminal for normal purposes.
    pub const SETTLED: &'static [TaskState] =
        &[TaskState::Complete, TaskState::Error, TaskState::Cancelled];

    /// States a backward search walks through when looking for a running ancestor.
    pub const PASSABLE: &'static [TaskState] = &[
        TaskState::Error,
        TaskState::Cancelled,
        TaskState::PartialComplete,
    ];

    /// Set membership.
    pub fn is_any(self, states: &[TaskState]) -> bool {
        states.contains(&self)
    }

    pub fn is_settled(self) -> bool {
        self.is_any(Self::SETTLED)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (None, Blocked | Pending | Cancelled)
                | (Blocked, Blocked | Pending | Cancelled)
                | (Pending, Complete | PartialComplete | Error)
                | (PartialComplete, Complete)
        )
    }
}
