use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

/// Number of retained task items per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub none: usize,
    pub blocked: usize,
    pub pending: usize,
    pub partial_complete: usize,
    pub complete: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::None => self.none += 1,
            TaskState::Blocked => self.blocked += 1,
            TaskState::Pending => self.pending += 1,
            TaskState::PartialComplete => self.partial_complete += 1,
            TaskState::Complete => self.complete += 1,
            TaskState::Error => self.error += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }

    /// Items that have not started yet.
    pub fn waiting(&self) -> usize {
        self.none + self.blocked
    }

    pub fn total(&self) -> usize {
        self.waiting()
            + self.pending
            + self.partial_complete
            + self.complete
            + self.error
            + self.cancelled
    }
}
