//! TaskRegistry port - task_id -> シリアライズ済みレコード
//!
//! 値は不透明な文字列です（エンコードは facade 側の codec が担当）。

use async_trait::async_trait;

use crate::domain::TaskId;
use crate::error::BackendError;

/// TaskRegistry はタスクレコードの正本（source of truth）
///
/// レコードは明示的な一括削除（`AtomicWrites` の `RegistryClear`）でのみ消えます。
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    async fn put(&self, task_id: &TaskId, raw: &str) -> Result<(), BackendError>;

    async fn get(&self, task_id: &TaskId) -> Result<Option<String>, BackendError>;

    async fn exists(&self, task_id: &TaskId) -> Result<bool, BackendError>;

    /// 全 id（順序は不定）
    async fn keys(&self) -> Result<Vec<TaskId>, BackendError>;

    async fn len(&self) -> Result<usize, BackendError>;
}
