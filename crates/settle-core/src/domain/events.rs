//! Busy/idle signals emitted by queues and groups.

use super::QueueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// Outstanding submissions went from zero to nonzero.
    StartProcess { queue: QueueId },

    /// Outstanding submissions went back to zero.
    EndProcess { queue: QueueId },
}

impl QueueEvent {
    pub fn queue(&self) -> QueueId {
        match self {
            QueueEvent::StartProcess { queue } | QueueEvent::EndProcess { queue } => *queue,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, QueueEvent::StartProcess { .. })
    }
}
