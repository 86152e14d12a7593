//! AtomicWrites port - 複数操作のアトミック実行
//!
//! Registry と Priority Index にまたがる書き込みは、必ずひとつの
//! `WriteBatch` として commit します。途中状態は外から見えません。

use async_trait::async_trait;

use crate::domain::TaskId;
use crate::error::BackendError;

use super::Score;

/// WriteOp はバッチ内のひとつの書き込み
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    IndexInsert { task_id: TaskId, score: Score },
    IndexRemove { task_id: TaskId },
    RegistryPut { task_id: TaskId, raw: String },
    /// 現在値が `expected` と一致するときだけ `raw` を書く
    RegistryCompareAndSwap {
        task_id: TaskId,
        expected: String,
        raw: String,
    },
    IndexClear,
    RegistryClear,
}

/// WriteBatch は all-or-nothing で適用される操作列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_insert(mut self, task_id: &TaskId, score: Score) -> Self {
        self.ops.push(WriteOp::IndexInsert {
            task_id: task_id.clone(),
            score,
        });
        self
    }

    pub fn index_remove(mut self, task_id: &TaskId) -> Self {
        self.ops.push(WriteOp::IndexRemove {
            task_id: task_id.clone(),
        });
        self
    }

    pub fn registry_put(mut self, task_id: &TaskId, raw: impl Into<String>) -> Self {
        self.ops.push(WriteOp::RegistryPut {
            task_id: task_id.clone(),
            raw: raw.into(),
        });
        self
    }

    pub fn registry_compare_and_swap(
        mut self,
        task_id: &TaskId,
        expected: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        self.ops.push(WriteOp::RegistryCompareAndSwap {
            task_id: task_id.clone(),
            expected: expected.into(),
            raw: raw.into(),
        });
        self
    }

    pub fn index_clear(mut self) -> Self {
        self.ops.push(WriteOp::IndexClear);
        self
    }

    pub fn registry_clear(mut self) -> Self {
        self.ops.push(WriteOp::RegistryClear);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// commit の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// 全操作が適用された
    Applied,
    /// compare-and-swap の前提が崩れたので何も適用していない
    Conflict,
}

/// AtomicWrites はバッチをひとつのトランザクションとして実行
#[async_trait]
pub trait AtomicWrites: Send + Sync {
    async fn commit(&self, batch: WriteBatch) -> Result<CommitOutcome, BackendError>;
}
