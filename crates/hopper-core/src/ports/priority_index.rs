//! PriorityIndex port - task_id -> score の順序付き構造
//!
//! Redis では sorted set、InMemory では BTreeSet が実装します。

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::domain::TaskId;
use crate::error::BackendError;

/// Score は Priority Index 内での順位
///
/// 外部ストアが `f64` で保持するため `f64` をそのまま包みます。
/// 比較は `total_cmp` による全順序です。
#[derive(Debug, Clone, Copy)]
pub struct Score(f64);

impl Score {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// pop_max の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub task_id: TaskId,
    pub score: Score,
}

/// PriorityIndex は「待機中」タスクの順序付き集合
///
/// # 契約
/// - `pop_max` は並行呼び出しに対してアトミック（同じ id を 2 回返さない）
/// - 空のときは `Ok(None)`（エラーではない）
#[async_trait]
pub trait PriorityIndex: Send + Sync {
    /// id を score で登録（既存なら score を上書き）
    async fn insert(&self, task_id: &TaskId, score: Score) -> Result<(), BackendError>;

    /// id を削除。存在していたら true
    async fn remove(&self, task_id: &TaskId) -> Result<bool, BackendError>;

    /// 最大 score のエントリを取り出す
    async fn pop_max(&self) -> Result<Option<IndexEntry>, BackendError>;

    async fn size(&self) -> Result<usize, BackendError>;
}
