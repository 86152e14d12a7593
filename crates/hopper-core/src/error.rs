//! Errors - キューとバックエンドのエラー型
//!
//! - `QueueError`: facade の呼び出し側に返すエラー（分類は固定）
//! - `BackendError`: ports の実装（Redis / InMemory）が返すエラー

use thiserror::Error;

use crate::domain::{TaskId, TaskStatus};

/// BackendErrorKind はバックエンド障害の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// 接続できない / 接続が切れた
    Connection,
    /// コマンドが失敗した
    Command,
    /// 応答の形式が想定外
    Protocol,
}

/// BackendError は ports 実装からのエラー
#[derive(Debug)]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: BackendErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connection, message)
    }

    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend error (kind: {:?}): {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors surfaced by `TaskQueue`.
///
/// No variant is retried internally; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task queue is full (max_size={max_size})")]
    Full { max_size: usize },

    #[error("wait for a task was canceled")]
    Canceled,

    #[error("priority {0} is outside the schedulable range")]
    InvalidPriority(i32),

    #[error("task {task_id} is {actual}, expected {expected}")]
    StatusMismatch {
        task_id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("task {0} kept changing concurrently; giving up")]
    Conflict(TaskId),

    #[error("failed to {operation} task {task_id}: {source}")]
    Codec {
        operation: &'static str,
        task_id: TaskId,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl QueueError {
    /// Wrap a backend error with the operation that was running.
    pub(crate) fn backend(operation: &'static str) -> impl FnOnce(BackendError) -> QueueError {
        move |source| QueueError::Backend { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn backend_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = BackendError::with_source(BackendErrorKind::Connection, "lost connection", io);
        assert_eq!(err.kind(), BackendErrorKind::Connection);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("lost connection"));
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn queue_error_names_the_operation() {
        let err = QueueError::backend("dequeue task")(BackendError::connection("refused"));
        let msg = err.to_string();
        assert!(msg.starts_with("failed to dequeue task"));
        assert!(err.source().is_some());
    }
}
