//! InMemoryBackend - 開発・テスト用のバックエンド
//!
//! すべての ports をひとつのプロセス内で実装します。
//!
//! # 実装詳細
//! - `tokio::sync::Mutex` ひとつで index と registry をまとめて守る
//!   （バッチの all-or-nothing はロック区間で保証）
//! - index は `BTreeSet<(Score, TaskId)>` + 逆引き `HashMap`
//! - 同点の score は id の辞書順で大きい方から pop（Redis の ZPOPMAX と同じ）
//! - ヒントは `tokio::sync::broadcast`

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use crate::domain::TaskId;
use crate::error::BackendError;
use crate::ports::{
    AtomicWrites, CommitOutcome, IndexEntry, NotificationChannel, PriorityIndex, Score,
    Subscription, TaskRegistry, WriteBatch, WriteOp,
};

const HINT_CAPACITY: usize = 256;

#[derive(Default)]
struct MemoryState {
    /// Ordered index entries.
    ordered: BTreeSet<(Score, TaskId)>,
    /// task_id -> current score.
    scores: HashMap<TaskId, Score>,
    /// task_id -> raw record.
    records: HashMap<TaskId, String>,
}

impl MemoryState {
    fn index_insert(&mut self, task_id: &TaskId, score: Score) {
        if let Some(old) = self.scores.insert(task_id.clone(), score) {
            self.ordered.remove(&(old, task_id.clone()));
        }
        self.ordered.insert((score, task_id.clone()));
    }

    fn index_remove(&mut self, task_id: &TaskId) -> bool {
        match self.scores.remove(task_id) {
            Some(score) => self.ordered.remove(&(score, task_id.clone())),
            None => false,
        }
    }

    fn index_pop_max(&mut self) -> Option<IndexEntry> {
        let (score, task_id) = self.ordered.pop_last()?;
        self.scores.remove(&task_id);
        Some(IndexEntry { task_id, score })
    }

    fn precondition_holds(&self, op: &WriteOp) -> bool {
        match op {
            WriteOp::RegistryCompareAndSwap {
                task_id, expected, ..
            } => self.records.get(task_id) == Some(expected),
            _ => true,
        }
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::IndexInsert { task_id, score } => self.index_insert(&task_id, score),
            WriteOp::IndexRemove { task_id } => {
                self.index_remove(&task_id);
            }
            WriteOp::RegistryPut { task_id, raw }
            | WriteOp::RegistryCompareAndSwap { task_id, raw, .. } => {
                self.records.insert(task_id, raw);
            }
            WriteOp::IndexClear => {
                self.ordered.clear();
                self.scores.clear();
            }
            WriteOp::RegistryClear => self.records.clear(),
        }
    }
}

/// InMemoryBackend は開発・テスト用の `QueueBackend`
///
/// # 使用例
/// ```ignore
/// let backend = Arc::new(InMemoryBackend::new());
/// let queue = TaskQueue::new(backend, QueueConfig::default());
/// ```
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    hints: broadcast::Sender<String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (hints, _) = broadcast::channel(HINT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            hints,
        }
    }

    /// Current number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.hints.receiver_count()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriorityIndex for InMemoryBackend {
    async fn insert(&self, task_id: &TaskId, score: Score) -> Result<(), BackendError> {
        self.state.lock().await.index_insert(task_id, score);
        Ok(())
    }

    async fn remove(&self, task_id: &TaskId) -> Result<bool, BackendError> {
        Ok(self.state.lock().await.index_remove(task_id))
    }

    async fn pop_max(&self) -> Result<Option<IndexEntry>, BackendError> {
        Ok(self.state.lock().await.index_pop_max())
    }

    async fn size(&self) -> Result<usize, BackendError> {
        Ok(self.state.lock().await.ordered.len())
    }
}

#[async_trait]
impl TaskRegistry for InMemoryBackend {
    async fn put(&self, task_id: &TaskId, raw: &str) -> Result<(), BackendError> {
        self.state
            .lock()
            .await
            .records
            .insert(task_id.clone(), raw.to_string());
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<String>, BackendError> {
        Ok(self.state.lock().await.records.get(task_id).cloned())
    }

    async fn exists(&self, task_id: &TaskId) -> Result<bool, BackendError> {
        Ok(self.state.lock().await.records.contains_key(task_id))
    }

    async fn keys(&self) -> Result<Vec<TaskId>, BackendError> {
        Ok(self.state.lock().await.records.keys().cloned().collect())
    }

    async fn len(&self) -> Result<usize, BackendError> {
        Ok(self.state.lock().await.records.len())
    }
}

#[async_trait]
impl NotificationChannel for InMemoryBackend {
    async fn publish(&self, hint: &str) -> Result<(), BackendError> {
        // 購読者がいなければ捨てる（at-most-effort）
        let _ = self.hints.send(hint.to_string());
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, BackendError> {
        let rx = self.hints.subscribe();
        let hints = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(hint) => Some((hint, rx)),
                // 取りこぼした分は「何かあるかも」として 1 件のヒントにまとめる
                Err(broadcast::error::RecvError::Lagged(_)) => Some((String::new(), rx)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(Subscription::new(hints))
    }
}

#[async_trait]
impl AtomicWrites for InMemoryBackend {
    async fn commit(&self, batch: WriteBatch) -> Result<CommitOutcome, BackendError> {
        let mut state = self.state.lock().await;
        if !batch.ops().iter().all(|op| state.precondition_holds(op)) {
            return Ok(CommitOutcome::Conflict);
        }
        for op in batch.into_ops() {
            state.apply(op);
        }
        Ok(CommitOutcome::Applied)
    }
}
