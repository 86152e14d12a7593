//! RedisBackend - Redis 上の QueueBackend 実装
//!
//! - PriorityIndex: sorted set（ZADD / ZREM / ZPOPMAX / ZCARD）
//! - TaskRegistry: hash（HSET / HGET / HEXISTS / HKEYS / HLEN）
//! - NotificationChannel: pub/sub（購読ごとに専用接続）
//! - AtomicWrites: Lua script

use async_trait::async_trait;
use futures::StreamExt;
use hopper_core::TaskId;
use hopper_core::error::{BackendError, BackendErrorKind};
use hopper_core::ports::{
    AtomicWrites, CommitOutcome, IndexEntry, NotificationChannel, PriorityIndex, Score,
    Subscription, TaskRegistry, WriteBatch,
};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::{debug, info, warn};

use crate::config::RedisConfig;
use crate::scripts::{COMMIT_SCRIPT, encode_args};

/// Redis-backed `QueueBackend`
///
/// Commands go through a shared `ConnectionManager` (multiplexed, reconnects
/// on failure). Subscriptions open their own connection.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
    connection_manager: ConnectionManager,
    config: RedisConfig,
    commit_script: Script,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("url", &self.config.redacted_url())
            .field("queue_key", &self.config.queue_key)
            .field("tasks_key", &self.config.tasks_key)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect and verify the server answers PING.
    pub async fn connect(config: RedisConfig) -> Result<Self, BackendError> {
        config.validate().map_err(|e| {
            BackendError::with_source(BackendErrorKind::Connection, "invalid redis config", e)
        })?;

        let info = config.connection_info().map_err(|e| {
            BackendError::with_source(BackendErrorKind::Connection, "invalid redis address", e)
        })?;
        let url = config.redacted_url();
        let client = redis::Client::open(info).map_err(|e| {
            BackendError::with_source(
                BackendErrorKind::Connection,
                "failed to create redis client",
                e,
            )
        })?;

        let connection_manager =
            tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client.clone()))
                .await
                .map_err(|_| {
                    BackendError::connection(format!(
                        "timed out connecting to {} after {:?}",
                        url,
                        config.connect_timeout()
                    ))
                })?
                .map_err(|e| {
                    BackendError::with_source(
                        BackendErrorKind::Connection,
                        "failed to connect to redis",
                        e,
                    )
                })?;

        let backend = Self {
            client,
            connection_manager,
            config,
            commit_script: Script::new(COMMIT_SCRIPT),
        };
        backend.ping().await?;

        info!(url = %url, "redis backend connected");
        Ok(backend)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    pub async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error("PING"))?;
        if pong != "PONG" {
            return Err(BackendError::new(
                BackendErrorKind::Protocol,
                format!("unexpected PING reply: {pong}"),
            ));
        }
        Ok(())
    }
}

/// Map a redis error, keeping connection failures distinguishable.
fn command_error(command: &'static str) -> impl FnOnce(RedisError) -> BackendError {
    move |e| {
        let kind = if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            BackendErrorKind::Connection
        } else if e.kind() == redis::ErrorKind::TypeError {
            BackendErrorKind::Protocol
        } else {
            BackendErrorKind::Command
        };
        BackendError::with_source(kind, format!("redis {command} failed"), e)
    }
}

#[async_trait]
impl PriorityIndex for RedisBackend {
    async fn insert(&self, task_id: &TaskId, score: Score) -> Result<(), BackendError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("ZADD")
            .arg(&self.config.queue_key)
            .arg(score.value())
            .arg(task_id.as_str())
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error("ZADD"))
    }

    async fn remove(&self, task_id: &TaskId) -> Result<bool, BackendError> {
        let mut conn = self.connection_manager.clone();
        let removed: i64 = redis::cmd("ZREM")
            .arg(&self.config.queue_key)
            .arg(task_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(command_error("ZREM"))?;
        Ok(removed > 0)
    }

    async fn pop_max(&self) -> Result<Option<IndexEntry>, BackendError> {
        let mut conn = self.connection_manager.clone();
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMAX")
            .arg(&self.config.queue_key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("ZPOPMAX"))?;

        Ok(popped.into_iter().next().map(|(member, score)| IndexEntry {
            task_id: TaskId::new(member),
            score: Score::new(score),
        }))
    }

    async fn size(&self) -> Result<usize, BackendError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("ZCARD")
            .arg(&self.config.queue_key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("ZCARD"))
    }
}

#[async_trait]
impl TaskRegistry for RedisBackend {
    async fn put(&self, task_id: &TaskId, raw: &str) -> Result<(), BackendError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("HSET")
            .arg(&self.config.tasks_key)
            .arg(task_id.as_str())
            .arg(raw)
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error("HSET"))
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("HGET")
            .arg(&self.config.tasks_key)
            .arg(task_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(command_error("HGET"))
    }

    async fn exists(&self, task_id: &TaskId) -> Result<bool, BackendError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("HEXISTS")
            .arg(&self.config.tasks_key)
            .arg(task_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(command_error("HEXISTS"))
    }

    async fn keys(&self) -> Result<Vec<TaskId>, BackendError> {
        let mut conn = self.connection_manager.clone();
        let keys: Vec<String> = redis::cmd("HKEYS")
            .arg(&self.config.tasks_key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("HKEYS"))?;
        Ok(keys.into_iter().map(TaskId::new).collect())
    }

    async fn len(&self) -> Result<usize, BackendError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("HLEN")
            .arg(&self.config.tasks_key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("HLEN"))
    }
}

#[async_trait]
impl NotificationChannel for RedisBackend {
    async fn publish(&self, hint: &str) -> Result<(), BackendError> {
        let mut conn = self.connection_manager.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.config.notify_channel)
            .arg(hint)
            .query_async(&mut conn)
            .await
            .map_err(command_error("PUBLISH"))?;
        debug!(hint = hint, receivers = receivers, "hint published");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, BackendError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(command_error("SUBSCRIBE"))?;
        pubsub
            .subscribe(&self.config.notify_channel)
            .await
            .map_err(command_error("SUBSCRIBE"))?;

        let hints = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(hint) => Some(hint),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable hint");
                    None
                }
            }
        });
        Ok(Subscription::new(hints))
    }
}

#[async_trait]
impl AtomicWrites for RedisBackend {
    async fn commit(&self, batch: WriteBatch) -> Result<CommitOutcome, BackendError> {
        if batch.is_empty() {
            return Ok(CommitOutcome::Applied);
        }

        let mut conn = self.connection_manager.clone();
        let mut invocation = self.commit_script.prepare_invoke();
        invocation
            .key(&self.config.queue_key)
            .key(&self.config.tasks_key);
        for arg in encode_args(batch) {
            invocation.arg(arg);
        }

        let applied: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(command_error("EVALSHA"))?;
        match applied {
            1 => Ok(CommitOutcome::Applied),
            0 => Ok(CommitOutcome::Conflict),
            other => Err(BackendError::new(
                BackendErrorKind::Protocol,
                format!("unexpected commit script reply: {other}"),
            )),
        }
    }
}
