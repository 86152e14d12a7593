//! hopper-core
//!
//! Distributed priority task queue on top of an ordered key/value store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskId, Priority, TaskStatus, Task, TaskFilter）
//! - **ports**: 抽象化レイヤー（PriorityIndex, TaskRegistry, NotificationChannel, AtomicWrites, Clock）
//! - **impls**: 実装（InMemoryBackend など開発用）
//! - **queue**: facade（TaskQueue）とスコア計算
//! - **config**: QueueConfig
//! - **error**: QueueError / BackendError
//! - **observability**: ステータス別の集計

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use config::{ConfigError, QueueConfig, TieBreak};
pub use domain::{Priority, Task, TaskFilter, TaskId, TaskStatus};
pub use error::{BackendError, BackendErrorKind, QueueError};
pub use observability::QueueCounts;
pub use queue::TaskQueue;
