//! NotificationChannel port - blocking consumer を起こすためのヒント
//!
//! データの正本ではありません。ヒントは欠落も重複もありえるので、
//! 受け取った側は必ず状態を読み直します。

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::BackendError;

/// Subscription はヒントのストリーム（購読者ごとに専有）
///
/// drop すると購読が解除されます。
pub struct Subscription {
    hints: Pin<Box<dyn Stream<Item = String> + Send>>,
}

impl Subscription {
    pub fn new(hints: impl Stream<Item = String> + Send + 'static) -> Self {
        Self {
            hints: Box::pin(hints),
        }
    }

    /// 次のヒントを待つ。フィードが終了したら None
    pub async fn next(&mut self) -> Option<String> {
        self.hints.next().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// NotificationChannel は at-most-effort の pub/sub
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, hint: &str) -> Result<(), BackendError>;

    async fn subscribe(&self) -> Result<Subscription, BackendError>;
}
