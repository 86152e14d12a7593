//! QueueBackend - facade が必要とする capability の束

use super::{AtomicWrites, NotificationChannel, PriorityIndex, TaskRegistry};

/// QueueBackend は 3 つの capability + アトミック書き込み
///
/// 4 つの trait を実装した型には自動で実装されます。
/// facade はこれを `Arc<dyn QueueBackend>` としてコンストラクタで受け取ります。
pub trait QueueBackend: PriorityIndex + TaskRegistry + NotificationChannel + AtomicWrites {}

impl<T> QueueBackend for T where T: PriorityIndex + TaskRegistry + NotificationChannel + AtomicWrites
{}
