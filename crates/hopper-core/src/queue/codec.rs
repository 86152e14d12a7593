//! Record codec: Task <-> registry string (JSON).

use crate::domain::{Task, TaskId};
use crate::error::QueueError;

pub(crate) fn encode(task: &Task) -> Result<String, QueueError> {
    serde_json::to_string(task).map_err(|source| QueueError::Codec {
        operation: "encode",
        task_id: task.id.clone(),
        source,
    })
}

pub(crate) fn decode(task_id: &TaskId, raw: &str) -> Result<Task, QueueError> {
    serde_json::from_str(raw).map_err(|source| QueueError::Codec {
        operation: "decode",
        task_id: task_id.clone(),
        source,
    })
}
