//! Listing filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Priority, Task, TaskStatus};

/// TaskFilter selects records for `TaskQueue::list`.
///
/// Every field is optional; set fields are combined with logical AND.
/// `created_after` / `created_before` are inclusive bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,

    /// Number of matches to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of results; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn assigned_to(mut self, worker: impl Into<String>) -> Self {
        self.assigned_to = Some(worker.into());
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(user_id) = &self.user_id
            && &task.user_id != user_id
        {
            return false;
        }
        if let Some(status) = self.status
            && task.status != status
        {
            return false;
        }
        if let Some(priority) = self.priority
            && task.priority != priority
        {
            return false;
        }
        if let Some(task_type) = &self.task_type
            && &task.task_type != task_type
        {
            return false;
        }
        if let Some(worker) = &self.assigned_to
            && &task.assigned_to != worker
        {
            return false;
        }
        if let Some(after) = self.created_after
            && task.created_at < after
        {
            return false;
        }
        if let Some(before) = self.created_before
            && task.created_at > before
        {
            return false;
        }
        true
    }

    /// Apply offset/limit to an already filtered list.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
