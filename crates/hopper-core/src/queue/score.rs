//! Score: priority-major ordering with a created_at tie-break.

use chrono::{DateTime, Utc};

use crate::config::TieBreak;
use crate::domain::Priority;
use crate::ports::Score;

/// Weight of one priority step.
///
/// Exceeds any second-granularity timestamp before year 2286, so a lower
/// priority never outscores a higher one.
pub const PRIORITY_WEIGHT: f64 = 1e10;

/// `priority * PRIORITY_WEIGHT ∓ created_at_unix_seconds`.
///
/// The index pops the maximum, so FIFO subtracts the timestamp and LIFO adds it.
/// Tasks created within the same second tie; the index then decides by id.
pub fn score(priority: Priority, created_at: DateTime<Utc>, tie_break: TieBreak) -> Score {
    let base = f64::from(priority.value()) * PRIORITY_WEIGHT;
    let ts = created_at.timestamp() as f64;
    match tie_break {
        TieBreak::Fifo => Score::new(base - ts),
        TieBreak::Lifo => Score::new(base + ts),
    }
}
