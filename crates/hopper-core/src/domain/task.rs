//! Task record: the unit of work and its metadata.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Priority, TaskId, TaskStatus};

/// Task record.
///
/// - `id` is immutable after creation.
/// - `updated_at` is refreshed on every mutation.
/// - The registry copy is the single source of truth; a `Task` held in memory
///   is a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Free-form classification, e.g. "image-classification".
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assigned_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default = "default_timeout", with = "duration_millis")]
    pub timeout: Duration,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
}

fn default_timeout() -> Duration {
    Task::DEFAULT_TIMEOUT
}

impl Task {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// New task in `Created` status with default priority and limits.
    pub fn new(
        id: impl Into<TaskId>,
        user_id: impl Into<String>,
        task_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            task_type: task_type.into(),
            description: String::new(),
            capabilities: Vec::new(),
            input: serde_json::Value::Null,
            metadata: serde_json::Map::new(),
            priority: Priority::NORMAL,
            status: TaskStatus::Created,
            assigned_to: String::new(),
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            timeout: Self::DEFAULT_TIMEOUT,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_count: 0,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Move to `status`, stamping `updated_at` and the lifecycle timestamps.
    pub fn update_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        match status {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled => {
                self.completed_at = Some(now)
            }
            _ => {}
        }
    }

    /// Record the worker that claimed this task.
    pub fn assign_to(&mut self, worker: impl Into<String>, now: DateTime<Utc>) {
        self.assigned_to = worker.into();
        self.updated_at = now;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A failed task with retries left may be enqueued again.
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
