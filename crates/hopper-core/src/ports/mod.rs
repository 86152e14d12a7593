//! Ports - 抽象化レイヤー
//!
//! 外部の順序付き KVS（Redis など）が提供する capability を trait で表します。
//! facade はこれらを組み合わせるだけで、実装の詳細は知りません。
//!
//! - PriorityIndex: 待機中タスクの順序（アトミックな max pop）
//! - TaskRegistry: レコードの正本
//! - NotificationChannel: 待機中 consumer へのヒント
//! - AtomicWrites: 上記にまたがる書き込みのトランザクション

pub mod backend;
pub mod clock;
pub mod id_generator;
pub mod notification;
pub mod priority_index;
pub mod task_registry;
pub mod transaction;

pub use self::backend::QueueBackend;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notification::{NotificationChannel, Subscription};
pub use self::priority_index::{IndexEntry, PriorityIndex, Score};
pub use self::task_registry::TaskRegistry;
pub use self::transaction::{AtomicWrites, CommitOutcome, WriteBatch, WriteOp};
