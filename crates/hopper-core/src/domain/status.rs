//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Created -> Queued (enqueue)
/// - Queued -> Assigned (dequeue claims it)
/// - Assigned -> Running -> Completed | Failed (reported by the worker via update)
/// - Created | Queued | Assigned | Running -> Canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Built by the producer, not yet visible to consumers.
    #[serde(alias = "pending")]
    Created,

    /// Waiting in the priority index.
    Queued,

    /// Claimed by a consumer.
    Assigned,

    /// Being executed.
    Running,

    Completed,

    Failed,

    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Created,
        TaskStatus::Queued,
        TaskStatus::Assigned,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Is this task waiting to be claimed?
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Queued)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" | "pending" => Ok(TaskStatus::Created),
            "queued" => Ok(TaskStatus::Queued),
            "assigned" | "dequeued" => Ok(TaskStatus::Assigned),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" | "cancelled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}
