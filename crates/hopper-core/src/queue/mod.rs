//! Queue facade: composes the priority index, the registry and the
//! notification channel into the public task queue.

mod codec;
pub mod score;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{Task, TaskFilter, TaskId, TaskStatus};
use crate::error::QueueError;
use crate::observability::QueueCounts;
use crate::ports::{
    AtomicWrites, Clock, CommitOutcome, NotificationChannel, PriorityIndex, QueueBackend, Score,
    Subscription, SystemClock, TaskRegistry, WriteBatch,
};

/// How many times a compare-and-swap is retried before giving up.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Distributed priority task queue.
///
/// Design intent:
/// - All shared state lives in the backend; nothing is cached between calls.
/// - Cross-process atomicity comes from `AtomicWrites::commit` and the index's
///   atomic `pop_max`, never from an in-process lock.
/// - The only local state is the open/closed flag.
pub struct TaskQueue {
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    closed: watch::Sender<bool>,
}

enum Wake {
    Canceled,
    Closed,
    Hint(String),
    FeedEnded,
    Tick,
}

impl TaskQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn QueueBackend>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            backend,
            config,
            clock,
            closed,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    async fn commit(
        &self,
        operation: &'static str,
        batch: WriteBatch,
    ) -> Result<CommitOutcome, QueueError> {
        self.backend
            .commit(batch)
            .await
            .map_err(QueueError::backend(operation))
    }

    /// Index size for log fields; `None` if the backend cannot answer.
    async fn queue_size_hint(&self) -> Option<usize> {
        self.backend.size().await.ok()
    }

    async fn read_raw(&self, task_id: &TaskId) -> Result<Option<String>, QueueError> {
        self.backend
            .get(task_id)
            .await
            .map_err(QueueError::backend("read task"))
    }

    /// Submit a task.
    ///
    /// On success the caller's record reflects the `Queued` status. The wake-up
    /// hint is published after the commit and its failure is only logged.
    pub async fn enqueue(&self, task: &mut Task) -> Result<(), QueueError> {
        self.ensure_open()?;

        if !task.priority.is_schedulable() {
            return Err(QueueError::InvalidPriority(task.priority.value()));
        }

        if self.config.max_size > 0 {
            let size = self
                .backend
                .size()
                .await
                .map_err(QueueError::backend("read queue size"))?;
            if size >= self.config.max_size {
                return Err(QueueError::Full {
                    max_size: self.config.max_size,
                });
            }
        }

        let mut queued = task.clone();
        queued.update_status(TaskStatus::Queued, self.clock.now());
        let raw = codec::encode(&queued)?;
        let score = score::score(queued.priority, queued.created_at, self.config.tie_break);

        let batch = WriteBatch::new()
            .registry_put(&queued.id, raw)
            .index_insert(&queued.id, score);
        if self.commit("enqueue task", batch).await? == CommitOutcome::Conflict {
            return Err(QueueError::Conflict(queued.id));
        }
        *task = queued;

        if let Err(err) = self.backend.publish(task.id.as_str()).await {
            warn!(task_id = %task.id, error = %err, "failed to publish notification");
        }

        let queue_size = self.queue_size_hint().await;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority.value(),
            score = score.value(),
            queue_size = queue_size,
            "task enqueued"
        );
        Ok(())
    }

    /// Claim the highest-scored waiting task.
    ///
    /// `Ok(None)` means the queue is empty. The claimed record is moved to
    /// `Assigned` in the registry.
    pub async fn dequeue(&self) -> Result<Option<Task>, QueueError> {
        self.ensure_open()?;

        loop {
            let Some(entry) = self
                .backend
                .pop_max()
                .await
                .map_err(QueueError::backend("pop queue"))?
            else {
                return Ok(None);
            };

            if let Some(task) = self.claim(&entry.task_id, entry.score).await? {
                let queue_size = self.queue_size_hint().await;
                info!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    priority = task.priority.value(),
                    queue_size = queue_size,
                    "task dequeued"
                );
                return Ok(Some(task));
            }
        }
    }

    /// Move a popped task from `Queued` to `Assigned`.
    ///
    /// Returns `None` when the record is no longer claimable (canceled between
    /// the pop and the read).
    async fn claim(&self, task_id: &TaskId, score: Score) -> Result<Option<Task>, QueueError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(raw) = self.read_raw(task_id).await? else {
                error!(task_id = %task_id, "index referenced a task missing from the registry");
                return Err(QueueError::TaskNotFound(task_id.clone()));
            };
            let mut task = codec::decode(task_id, &raw)?;

            if !task.status.is_claimable() {
                warn!(
                    task_id = %task_id,
                    status = %task.status,
                    "skipping popped task that is no longer queued"
                );
                return Ok(None);
            }

            task.update_status(TaskStatus::Assigned, self.clock.now());
            let claimed = codec::encode(&task)?;
            let batch = WriteBatch::new().registry_compare_and_swap(task_id, raw, claimed);
            match self.commit("claim task", batch).await? {
                CommitOutcome::Applied => return Ok(Some(task)),
                CommitOutcome::Conflict => {
                    debug!(task_id = %task_id, "task changed while claiming; re-reading");
                }
            }
        }

        // Put it back so it is not stranded outside the index.
        self.backend
            .insert(task_id, score)
            .await
            .map_err(QueueError::backend("requeue task"))?;
        Err(QueueError::Conflict(task_id.clone()))
    }

    /// Block until a task can be claimed.
    ///
    /// Wakes on a notification hint or every `poll_interval`, whichever comes
    /// first. Fails with `Canceled` when `cancel` fires and with `Closed` when
    /// the queue is closed. The subscription is dropped on every return path.
    pub async fn dequeue_wait(&self, cancel: &CancellationToken) -> Result<Task, QueueError> {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(QueueError::Canceled);
        }

        let mut closed_rx = self.closed.subscribe();
        let mut feed = Some(
            self.backend
                .subscribe()
                .await
                .map_err(QueueError::backend("subscribe to notifications"))?,
        );

        if let Some(task) = self.dequeue().await? {
            return Ok(task);
        }

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Canceled,
                _ = wait_closed(&mut closed_rx) => Wake::Closed,
                hint = next_hint(&mut feed) => match hint {
                    Some(hint) => Wake::Hint(hint),
                    None => Wake::FeedEnded,
                },
                _ = poll.tick() => Wake::Tick,
            };

            match wake {
                Wake::Canceled => return Err(QueueError::Canceled),
                Wake::Closed => return Err(QueueError::Closed),
                Wake::Hint(hint) => debug!(hint = %hint, "notification received"),
                Wake::FeedEnded => {
                    warn!("notification feed ended; relying on polling");
                    feed = None;
                }
                Wake::Tick => {}
            }

            if let Some(task) = self.dequeue().await? {
                return Ok(task);
            }
        }
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<Task, QueueError> {
        self.ensure_open()?;
        let raw = self
            .read_raw(task_id)
            .await?
            .ok_or_else(|| QueueError::TaskNotFound(task_id.clone()))?;
        codec::decode(task_id, &raw)
    }

    /// Overwrite a stored record. Refreshes `updated_at` on the caller's copy.
    pub async fn update(&self, task: &mut Task) -> Result<(), QueueError> {
        self.ensure_open()?;

        let exists = self
            .backend
            .exists(&task.id)
            .await
            .map_err(QueueError::backend("check task existence"))?;
        if !exists {
            return Err(QueueError::TaskNotFound(task.id.clone()));
        }

        task.updated_at = self.clock.now();
        let raw = codec::encode(task)?;
        self.backend
            .put(&task.id, &raw)
            .await
            .map_err(QueueError::backend("update task"))?;

        debug!(task_id = %task.id, status = %task.status, "task updated");
        Ok(())
    }

    /// Overwrite a stored record only while its stored status is `expected`.
    ///
    /// Workers use this for their own transitions (`Assigned -> Running`,
    /// `Running -> Completed`) so a concurrent `cancel` is never overwritten.
    /// Fails with `StatusMismatch` carrying the stored status otherwise.
    pub async fn update_from(
        &self,
        task: &mut Task,
        expected: TaskStatus,
    ) -> Result<(), QueueError> {
        self.ensure_open()?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let raw = self
                .read_raw(&task.id)
                .await?
                .ok_or_else(|| QueueError::TaskNotFound(task.id.clone()))?;
            let stored = codec::decode(&task.id, &raw)?;
            if stored.status != expected {
                return Err(QueueError::StatusMismatch {
                    task_id: task.id.clone(),
                    expected,
                    actual: stored.status,
                });
            }

            let mut next = task.clone();
            next.updated_at = self.clock.now();
            let encoded = codec::encode(&next)?;
            let batch = WriteBatch::new().registry_compare_and_swap(&task.id, raw, encoded);
            match self.commit("update task", batch).await? {
                CommitOutcome::Applied => {
                    *task = next;
                    debug!(
                        task_id = %task.id,
                        from = %expected,
                        to = %task.status,
                        "task transitioned"
                    );
                    return Ok(());
                }
                CommitOutcome::Conflict => {
                    debug!(task_id = %task.id, "task changed while updating; re-reading");
                }
            }
        }
        Err(QueueError::Conflict(task.id.clone()))
    }

    /// Cancel a task.
    ///
    /// - Terminal tasks are left untouched.
    /// - A waiting task is removed from the index and marked `Canceled`.
    /// - A task already claimed by a worker is marked `Canceled`; the claim is
    ///   not revoked, the worker sees the status through `get`.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<(), QueueError> {
        self.ensure_open()?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let raw = self
                .read_raw(task_id)
                .await?
                .ok_or_else(|| QueueError::TaskNotFound(task_id.clone()))?;
            let mut task = codec::decode(task_id, &raw)?;

            if task.is_terminal() {
                debug!(task_id = %task_id, status = %task.status, "cancel on terminal task ignored");
                return Ok(());
            }

            let previous = task.status;
            task.update_status(TaskStatus::Canceled, self.clock.now());
            let canceled = codec::encode(&task)?;
            let batch = WriteBatch::new()
                .index_remove(task_id)
                .registry_compare_and_swap(task_id, raw, canceled);

            match self.commit("cancel task", batch).await? {
                CommitOutcome::Applied => {
                    info!(task_id = %task_id, previous_status = %previous, "task canceled");
                    return Ok(());
                }
                CommitOutcome::Conflict => {
                    debug!(task_id = %task_id, "task changed while canceling; re-reading");
                }
            }
        }
        Err(QueueError::Conflict(task_id.clone()))
    }

    /// Scan the registry and return matching records.
    ///
    /// Results are ordered by `(created_at, id)` before `offset`/`limit` apply.
    /// Records that fail to decode are skipped and logged.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, QueueError> {
        self.ensure_open()?;

        let mut matched = Vec::new();
        for task_id in self.registry_keys().await? {
            // Purged between keys() and get().
            let Some(raw) = self.read_raw(&task_id).await? else {
                continue;
            };
            match codec::decode(&task_id, &raw) {
                Ok(task) if filter.matches(&task) => matched.push(task),
                Ok(_) => {}
                Err(err) => warn!(task_id = %task_id, error = %err, "skipping unreadable task"),
            }
        }

        matched.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(filter.paginate(matched))
    }

    async fn registry_keys(&self) -> Result<Vec<TaskId>, QueueError> {
        self.backend
            .keys()
            .await
            .map_err(QueueError::backend("list task ids"))
    }

    /// Number of tasks waiting to be claimed.
    pub async fn size(&self) -> Result<usize, QueueError> {
        self.ensure_open()?;
        self.backend
            .size()
            .await
            .map_err(QueueError::backend("read queue size"))
    }

    /// Number of registry records, any status.
    pub async fn total_tasks(&self) -> Result<usize, QueueError> {
        self.ensure_open()?;
        self.backend
            .len()
            .await
            .map_err(QueueError::backend("count tasks"))
    }

    /// Registry records grouped by status.
    pub async fn counts_by_status(&self) -> Result<QueueCounts, QueueError> {
        self.ensure_open()?;

        let mut counts = QueueCounts::default();
        for task_id in self.registry_keys().await? {
            let Some(raw) = self.read_raw(&task_id).await? else {
                continue;
            };
            match codec::decode(&task_id, &raw) {
                Ok(task) => counts.record(task.status),
                Err(_) => counts.unreadable += 1,
            }
        }
        Ok(counts)
    }

    /// Shut the queue down. Idempotent.
    ///
    /// Pending `dequeue_wait` calls return `Closed`, and so does every later call.
    pub async fn close(&self) -> Result<(), QueueError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }

        match self.backend.len().await {
            Ok(remaining) => info!(remaining_tasks = remaining, "task queue closed"),
            Err(err) => info!(error = %err, "task queue closed"),
        }
        Ok(())
    }

    /// Delete every index entry and every record. Test/maintenance only.
    pub async fn clear_all(&self) -> Result<(), QueueError> {
        self.ensure_open()?;
        let batch = WriteBatch::new().index_clear().registry_clear();
        self.commit("clear queue", batch).await?;
        info!("task queue cleared");
        Ok(())
    }
}

async fn wait_closed(closed_rx: &mut watch::Receiver<bool>) {
    // Err means the sender is gone, which only happens when the queue is dropped.
    let _ = closed_rx.wait_for(|closed| *closed).await;
}

async fn next_hint(feed: &mut Option<Subscription>) -> Option<String> {
    match feed {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TieBreak;
    use crate::domain::Priority;
    use crate::impls::InMemoryBackend;
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};
    use rstest::rstest;
    use std::collections::HashSet;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn setup(config: QueueConfig) -> (Arc<InMemoryBackend>, TaskQueue) {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(FixedClock::new(at(1_000)));
        let queue = TaskQueue::with_clock(backend.clone(), config, clock);
        (backend, queue)
    }

    fn task(id: &str, priority: i32, created: i64) -> Task {
        Task::new(id, "user-1", "echo", at(created)).with_priority(priority)
    }

    async fn drain(queue: &TaskQueue) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(task) = queue.dequeue().await.unwrap() {
            ids.push(task.id.into_inner());
        }
        ids
    }

    #[tokio::test]
    async fn dequeue_serves_highest_priority_first() {
        let (_, queue) = setup(QueueConfig::default());
        for (id, priority) in [("low", 0), ("critical", 3), ("normal", 1), ("high", 2)] {
            queue.enqueue(&mut task(id, priority, 100)).await.unwrap();
        }

        assert_eq!(drain(&queue).await, vec!["critical", "high", "normal", "low"]);
    }

    #[rstest]
    #[case::fifo(TieBreak::Fifo, vec!["C", "A", "B"])]
    #[case::lifo(TieBreak::Lifo, vec!["C", "B", "A"])]
    #[tokio::test]
    async fn equal_priority_follows_tie_break(
        #[case] tie_break: TieBreak,
        #[case] expected: Vec<&str>,
    ) {
        let (_, queue) = setup(QueueConfig::default().with_tie_break(tie_break));
        queue.enqueue(&mut task("A", 5, 100)).await.unwrap();
        queue.enqueue(&mut task("B", 5, 200)).await.unwrap();
        queue.enqueue(&mut task("C", 9, 50)).await.unwrap();

        assert_eq!(drain(&queue).await, expected);
    }

    #[tokio::test]
    async fn enqueue_marks_task_queued() {
        let (_, queue) = setup(QueueConfig::default());
        let mut t = task("t-1", 1, 100);
        queue.enqueue(&mut t).await.unwrap();

        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.updated_at, at(1_000));
        assert_eq!(queue.get(&t.id).await.unwrap(), t);
    }

    #[tokio::test]
    async fn dequeue_marks_task_assigned_and_shrinks_size() {
        let (_, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("a", 1, 100)).await.unwrap();
        queue.enqueue(&mut task("b", 1, 101)).await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 2);

        let claimed = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Assigned);
        assert_eq!(queue.get(&claimed.id).await.unwrap().status, TaskStatus::Assigned);
        assert_eq!(queue.size().await.unwrap(), 1);
        assert_eq!(queue.total_tasks().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dequeue_on_empty_queue_is_none() {
        let (_, queue) = setup(QueueConfig::default());
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_claim_each_task_once() {
        let (_, queue) = setup(QueueConfig::unbounded());
        let queue = Arc::new(queue);
        let mut expected = HashSet::new();
        for i in 0..100 {
            let id = format!("t-{i:03}");
            queue.enqueue(&mut task(&id, i % 4, 100 + i64::from(i))).await.unwrap();
            expected.insert(id);
        }

        let mut handles = Vec::new();
        for _ in 0..6 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { drain(&queue).await }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            claimed.extend(handle.await.unwrap());
        }
        assert_eq!(claimed.len(), 100);
        assert_eq!(claimed.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[tokio::test]
    async fn canceled_task_is_never_dequeued() {
        let (_, queue) = setup(QueueConfig::default());
        let mut urgent = task("urgent", 5, 100);
        queue.enqueue(&mut urgent).await.unwrap();
        queue.enqueue(&mut task("routine", 1, 100)).await.unwrap();

        queue.cancel(&urgent.id).await.unwrap();

        assert_eq!(queue.size().await.unwrap(), 1);
        assert_eq!(drain(&queue).await, vec!["routine"]);
        let stored = queue.get(&urgent.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Canceled);
        assert_eq!(stored.completed_at, Some(at(1_000)));
    }

    #[tokio::test]
    async fn cancel_after_claim_marks_canceled() {
        let (_, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("t-1", 1, 100)).await.unwrap();
        let claimed = queue.dequeue().await.unwrap().unwrap();

        queue.cancel(&claimed.id).await.unwrap();
        assert_eq!(queue.get(&claimed.id).await.unwrap().status, TaskStatus::Canceled);
    }

    #[tokio::test]
    async fn cancel_leaves_terminal_task_alone() {
        let (_, queue) = setup(QueueConfig::default());
        let mut t = task("t-1", 1, 100);
        queue.enqueue(&mut t).await.unwrap();
        let mut claimed = queue.dequeue().await.unwrap().unwrap();
        claimed.update_status(TaskStatus::Completed, at(2_000));
        queue.update(&mut claimed).await.unwrap();

        queue.cancel(&t.id).await.unwrap();
        assert_eq!(queue.get(&t.id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let (_, queue) = setup(QueueConfig::default());
        let missing = TaskId::new("nope");

        assert!(matches!(queue.get(&missing).await, Err(QueueError::TaskNotFound(id)) if id == missing));
        assert!(matches!(queue.cancel(&missing).await, Err(QueueError::TaskNotFound(_))));
        let mut t = task("nope", 1, 100);
        assert!(matches!(queue.update(&mut t).await, Err(QueueError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn update_overwrites_record() {
        let (_, queue) = setup(QueueConfig::default());
        let mut t = task("t-1", 1, 100);
        queue.enqueue(&mut t).await.unwrap();

        t.update_status(TaskStatus::Running, at(1_500));
        t.assign_to("worker-7", at(1_500));
        queue.update(&mut t).await.unwrap();

        let stored = queue.get(&t.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.assigned_to, "worker-7");
        assert_eq!(stored.started_at, Some(at(1_500)));
        assert_eq!(stored.updated_at, at(1_000));
    }

    #[tokio::test]
    async fn worker_transitions_follow_stored_status() {
        let (_, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("t-1", 1, 100)).await.unwrap();
        let mut claimed = queue.dequeue().await.unwrap().unwrap();

        claimed.update_status(TaskStatus::Running, at(1_100));
        queue.update_from(&mut claimed, TaskStatus::Assigned).await.unwrap();
        claimed.update_status(TaskStatus::Completed, at(1_200));
        queue.update_from(&mut claimed, TaskStatus::Running).await.unwrap();

        let stored = queue.get(&claimed.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored, claimed);
    }

    #[tokio::test]
    async fn cancel_after_claim_is_not_overwritten_by_worker() {
        let (_, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("t-1", 1, 100)).await.unwrap();
        let mut claimed = queue.dequeue().await.unwrap().unwrap();

        queue.cancel(&claimed.id).await.unwrap();

        claimed.update_status(TaskStatus::Running, at(1_100));
        let err = queue
            .update_from(&mut claimed, TaskStatus::Assigned)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::StatusMismatch {
                expected: TaskStatus::Assigned,
                actual: TaskStatus::Canceled,
                ..
            }
        ));
        assert_eq!(
            queue.get(&claimed.id).await.unwrap().status,
            TaskStatus::Canceled
        );
    }

    #[tokio::test]
    async fn full_queue_rejects_enqueue() {
        let (_, queue) = setup(QueueConfig::default().with_max_size(2));
        queue.enqueue(&mut task("a", 1, 100)).await.unwrap();
        queue.enqueue(&mut task("b", 1, 100)).await.unwrap();

        let mut rejected = task("c", 1, 100);
        let err = queue.enqueue(&mut rejected).await.unwrap_err();
        assert!(matches!(err, QueueError::Full { max_size: 2 }));
        assert_eq!(rejected.status, TaskStatus::Created);
        assert_eq!(queue.total_tasks().await.unwrap(), 2);

        // Claimed tasks no longer count against the bound.
        queue.dequeue().await.unwrap().unwrap();
        queue.enqueue(&mut rejected).await.unwrap();
    }

    #[rstest]
    #[case(Priority::MAX + 1)]
    #[case(-Priority::MAX - 1)]
    #[tokio::test]
    async fn out_of_range_priority_is_rejected(#[case] priority: i32) {
        let (_, queue) = setup(QueueConfig::default());
        let err = queue.enqueue(&mut task("t", priority, 100)).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidPriority(p) if p == priority));
        assert_eq!(queue.total_tasks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dequeue_skips_entries_that_are_no_longer_queued() {
        let (backend, queue) = setup(QueueConfig::default());
        let mut stale = task("stale", 9, 100);
        stale.update_status(TaskStatus::Canceled, at(100));
        backend
            .put(&stale.id, &serde_json::to_string(&stale).unwrap())
            .await
            .unwrap();
        backend.insert(&stale.id, Score::new(9e10)).await.unwrap();
        queue.enqueue(&mut task("live", 1, 100)).await.unwrap();

        assert_eq!(drain(&queue).await, vec!["live"]);
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn index_entry_without_record_is_reported() {
        let (backend, queue) = setup(QueueConfig::default());
        backend.insert(&TaskId::new("ghost"), Score::new(1.0)).await.unwrap();

        assert!(matches!(queue.dequeue().await, Err(QueueError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let (_, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("c", 1, 300)).await.unwrap();
        queue.enqueue(&mut task("a", 2, 100)).await.unwrap();
        queue.enqueue(&mut task("b", 1, 200)).await.unwrap();
        let mut other = Task::new("d", "user-2", "resize", at(150));
        queue.enqueue(&mut other).await.unwrap();

        let ids = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.id.into_inner()).collect::<Vec<_>>();

        let all = queue.list(&TaskFilter::new()).await.unwrap();
        assert_eq!(ids(all), vec!["a", "d", "b", "c"]);

        let mine = queue.list(&TaskFilter::new().user_id("user-1")).await.unwrap();
        assert_eq!(ids(mine), vec!["a", "b", "c"]);

        let page = queue
            .list(&TaskFilter::new().task_type("echo").offset(1).limit(1))
            .await
            .unwrap();
        assert_eq!(ids(page), vec!["b"]);

        let normal = queue.list(&TaskFilter::new().priority(1)).await.unwrap();
        assert_eq!(normal.len(), 3);
    }

    #[tokio::test]
    async fn list_skips_unreadable_records() {
        let (backend, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("good", 1, 100)).await.unwrap();
        backend.put(&TaskId::new("bad"), "{not json").await.unwrap();

        let listed = queue.list(&TaskFilter::new()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, TaskId::new("good"));

        let counts = queue.counts_by_status().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.unreadable, 1);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn counts_follow_lifecycle() {
        let (_, queue) = setup(QueueConfig::default());
        for id in ["a", "b", "c"] {
            queue.enqueue(&mut task(id, 1, 100)).await.unwrap();
        }
        queue.dequeue().await.unwrap().unwrap();
        queue.cancel(&TaskId::new("b")).await.unwrap();

        let counts = queue.counts_by_status().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.assigned, 1);
        assert_eq!(counts.canceled, 1);
    }

    #[tokio::test]
    async fn queue_size_hint_tracks_waiting_tasks() {
        let (_, queue) = setup(QueueConfig::default());
        assert_eq!(queue.queue_size_hint().await, Some(0));

        queue.enqueue(&mut task("a", 1, 100)).await.unwrap();
        queue.enqueue(&mut task("b", 1, 100)).await.unwrap();
        assert_eq!(queue.queue_size_hint().await, Some(2));

        queue.dequeue().await.unwrap().unwrap();
        assert_eq!(queue.queue_size_hint().await, Some(1));
    }

    #[tokio::test]
    async fn clear_all_removes_everything() {
        let (_, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("a", 1, 100)).await.unwrap();
        queue.enqueue(&mut task("b", 1, 100)).await.unwrap();

        queue.clear_all().await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 0);
        assert_eq!(queue.total_tasks().await.unwrap(), 0);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_queue_rejects_calls() {
        let (_, queue) = setup(QueueConfig::default());
        queue.close().await.unwrap();
        queue.close().await.unwrap();

        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(&mut task("a", 1, 100)).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(queue.dequeue().await, Err(QueueError::Closed)));
        assert!(matches!(queue.size().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn dequeue_wait_returns_available_task_immediately() {
        let (backend, queue) = setup(QueueConfig::default());
        queue.enqueue(&mut task("ready", 1, 100)).await.unwrap();

        let got = queue.dequeue_wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(got.id, TaskId::new("ready"));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dequeue_wait_releases_subscription_on_backend_error() {
        let (backend, queue) = setup(QueueConfig::default());
        backend.insert(&TaskId::new("ghost"), Score::new(1.0)).await.unwrap();

        let err = queue.dequeue_wait(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::TaskNotFound(_)));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn zero_poll_interval_with_cancelled_token_returns_canceled() {
        let (backend, queue) = setup(QueueConfig::default().with_poll_interval(Duration::ZERO));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = queue.dequeue_wait(&cancel).await.unwrap_err();
        assert!(matches!(err, QueueError::Canceled));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_still_polls() {
        let (backend, queue) = setup(QueueConfig::default().with_poll_interval(Duration::ZERO));
        let queue = Arc::new(queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_wait(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut silent = task("silent", 1, 100);
        silent.update_status(TaskStatus::Queued, at(100));
        backend
            .put(&silent.id, &serde_json::to_string(&silent).unwrap())
            .await
            .unwrap();
        backend.insert(&silent.id, Score::new(1.0)).await.unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.id, TaskId::new("silent"));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_wait_honours_cancellation() {
        let (backend, queue) = setup(QueueConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = queue.dequeue_wait(&cancel).await.unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(err, QueueError::Canceled));
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_millis(2_500));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_wakes_waiter_before_poll() {
        let config = QueueConfig::default().with_poll_interval(Duration::from_secs(60));
        let (backend, queue) = setup(config);
        let queue = Arc::new(queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_wait(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.subscriber_count(), 1);

        let started = tokio::time::Instant::now();
        queue.enqueue(&mut task("wake", 1, 100)).await.unwrap();
        let got = waiter.await.unwrap().unwrap();

        assert_eq!(got.id, TaskId::new("wake"));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_finds_tasks_without_notification() {
        let (backend, queue) = setup(QueueConfig::default());
        let queue = Arc::new(queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_wait(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Written behind the queue's back, so no hint is published.
        let mut silent = task("silent", 1, 100);
        silent.update_status(TaskStatus::Queued, at(100));
        backend
            .put(&silent.id, &serde_json::to_string(&silent).unwrap())
            .await
            .unwrap();
        backend.insert(&silent.id, Score::new(1.0)).await.unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.id, TaskId::new("silent"));
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_unblocks_waiters() {
        let (backend, queue) = setup(QueueConfig::default());
        let queue = Arc::new(queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_wait(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(backend.subscriber_count(), 1);

        queue.close().await.unwrap();
        assert!(matches!(waiter.await.unwrap(), Err(QueueError::Closed)));
        assert_eq!(backend.subscriber_count(), 0);
    }
}
