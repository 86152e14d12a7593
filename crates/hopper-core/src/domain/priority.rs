//! Task priority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority: higher value is served first.
///
/// Any integer is representable, but only values within `[-MAX, MAX]` can be
/// enqueued: the priority index stores scores as `f64`, and the combined score
/// must stay exactly representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i32);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(1);
    pub const HIGH: Priority = Priority(2);
    pub const CRITICAL: Priority = Priority(3);

    /// Largest magnitude accepted by the queue.
    pub const MAX: i32 = 900_000;

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i32 {
        self.0
    }

    /// Can this priority be scored without losing precision?
    pub fn is_schedulable(self) -> bool {
        (-Self::MAX..=Self::MAX).contains(&self.0)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
