use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

/// Number of registry records per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub created: usize,
    pub queued: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Records that could not be decoded.
    pub unreadable: usize,
}

impl QueueCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Created => self.created += 1,
            TaskStatus::Queued => self.queued += 1,
            TaskStatus::Assigned => self.assigned += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Canceled => self.canceled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created
            + self.queued
            + self.assigned
            + self.running
            + self.completed
            + self.failed
            + self.canceled
            + self.unreadable
    }
}
