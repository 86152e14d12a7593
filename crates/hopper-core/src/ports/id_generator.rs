//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::TaskId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で衝突しない TaskId を生成
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::new(format!("task-{ulid}"))
    }
}
