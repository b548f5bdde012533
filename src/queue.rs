use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use super::{Entity, QueueStore, RunContext, StoreError};

// How often wait_for_next re-checks the shutdown flag while sleeping
// between empty polls.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub(crate) enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The popped member was not a `{"uuid": ..., "type": ...}` object.
    /// The member has already been removed from the set; the caller logs
    /// and drops it rather than requeueing.
    #[error("malformed queue member: {member}")]
    MalformedMember { member: String },

    #[error("{uuid}: exhausted retries after {attempts} attempts")]
    MaxAttemptsExceeded { uuid: String, attempts: u64 },
}

/// Priority queue of entities awaiting preservation, backed by a sorted
/// set keyed by epoch-seconds scores. Re-adding an entity moves it back
/// in the queue (last-write-wins), so update storms coalesce into one
/// pending job that is popped only once it has rested for `minimum_age`.
///
/// The retry counter lives under a separate key (`retry_prefix + uuid`)
/// and is not mutated atomically with the set entry; a crash between the
/// two leaves a stale counter, which is accepted.
pub(crate) struct PreservationQueue<S: QueueStore> {
    pub(crate) store: S,
    queue_name: String,
    retry_prefix: String,
    minimum_age: Duration,
    poll_interval: Duration,
    max_attempts: u64,
    base_backoff_secs: f64,
}

impl<S: QueueStore> PreservationQueue<S> {
    pub(crate) fn new(
        store: S,
        queue_name: impl Into<String>,
        retry_prefix: impl Into<String>,
        minimum_age: Duration,
        poll_interval: Duration,
        max_attempts: u64,
        base_backoff_secs: f64,
    ) -> Self {
        Self {
            store,
            queue_name: queue_name.into(),
            retry_prefix: retry_prefix.into(),
            minimum_age,
            poll_interval,
            max_attempts,
            base_backoff_secs,
        }
    }

    /// Pop the lowest-scored entry if it has rested for at least
    /// `minimum_age`. Returns `None` when the queue is empty, the head is
    /// too young, or a concurrent worker won the race for it.
    pub(crate) fn dequeue_if_ready(&self) -> Result<Option<Entity>, QueueError> {
        let max_score = epoch_now() - self.minimum_age.as_secs_f64();
        let Some(member) = self.store.pop_lowest_if(&self.queue_name, max_score)? else {
            return Ok(None);
        };
        Entity::from_member(&member).map(Some).map_err(|_| {
            QueueError::MalformedMember { member }
        })
    }

    /// Poll until an entry is ready or `ctx` asks for shutdown (`None`).
    /// The sleep between polls is sliced so a shutdown request takes
    /// effect at the next slice, not after a full poll interval.
    pub(crate) fn wait_for_next(&self, ctx: &RunContext) -> Result<Option<Entity>, QueueError> {
        loop {
            if !ctx.should_continue() {
                return Ok(None);
            }
            if let Some(entity) = self.dequeue_if_ready()? {
                return Ok(Some(entity));
            }
            let mut slept = Duration::ZERO;
            while slept < self.poll_interval {
                if !ctx.should_continue() {
                    return Ok(None);
                }
                let slice = SLEEP_SLICE.min(self.poll_interval - slept);
                thread::sleep(slice);
                slept += slice;
            }
        }
    }

    /// Record one failed attempt; returns the new attempt count.
    pub(crate) fn record_failure(&self, uuid: &str) -> Result<u64, QueueError> {
        Ok(self.store.increment(&self.retry_key(uuid))?)
    }

    pub(crate) fn current_attempt_count(&self, uuid: &str) -> Result<u64, QueueError> {
        Ok(self.store.counter(&self.retry_key(uuid))?)
    }

    /// Re-add the entry with an exponentially backed-off score, or give up
    /// once `attempt_count` exceeds the configured maximum (the retry
    /// counter is deleted and `MaxAttemptsExceeded` comes back; the caller
    /// logs the permanent failure and drops the item).
    pub(crate) fn reschedule_with_backoff(
        &self,
        entity: &Entity,
        attempt_count: u64,
    ) -> Result<(), QueueError> {
        if attempt_count > self.max_attempts {
            self.store.remove_counter(&self.retry_key(&entity.uuid))?;
            return Err(QueueError::MaxAttemptsExceeded {
                uuid: entity.uuid.clone(),
                attempts: attempt_count,
            });
        }
        let member = entity
            .to_member()
            .map_err(|_| QueueError::MalformedMember {
                member: entity.uuid.clone(),
            })?;
        let score = epoch_now() + self.backoff(attempt_count);
        self.store.add(&self.queue_name, score, &member)?;
        Ok(())
    }

    /// `base_wait * 2^n`. The attempt count is post-increment, so the
    /// first retry already waits twice the base. Downstream tooling keys
    /// on this indexing; do not "fix" the off-by-one.
    pub(crate) fn backoff(&self, attempt_count: u64) -> f64 {
        self.base_backoff_secs * 2.0_f64.powi(attempt_count as i32)
    }

    fn retry_key(&self, uuid: &str) -> String {
        format!("{}{}", self.retry_prefix, uuid)
    }
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::MemoryStore;

    fn queue(minimum_age: Duration, max_attempts: u64) -> PreservationQueue<MemoryStore> {
        PreservationQueue::new(
            MemoryStore::new(),
            "test:queue",
            "test:retry:",
            minimum_age,
            Duration::ZERO,
            max_attempts,
            10.0,
        )
    }

    fn seed(q: &PreservationQueue<MemoryStore>, score: f64, uuid: &str) {
        let member = Entity::new(uuid, "items").to_member().unwrap();
        q.store.add("test:queue", score, &member).unwrap();
    }

    // ── age gating ──────────────────────────────────────────────────

    #[test]
    fn too_young_entries_stay_queued() {
        let q = queue(Duration::from_secs(15 * 60), 5);
        // 14 minutes old: not ready yet.
        seed(&q, epoch_now() - 14.0 * 60.0, "noid1");
        assert!(q.dequeue_if_ready().unwrap().is_none());
        // 15 minutes old: ready.
        let q = queue(Duration::from_secs(15 * 60), 5);
        seed(&q, epoch_now() - 15.0 * 60.0, "noid1");
        assert_eq!(q.dequeue_if_ready().unwrap().unwrap().uuid, "noid1");
    }

    // ── priority order ──────────────────────────────────────────────

    #[test]
    fn dequeues_in_score_order_with_last_write_wins() {
        let q = queue(Duration::ZERO, 5);
        seed(&q, 1.0, "noid1");
        seed(&q, 3.0, "noid3");
        seed(&q, 4.0, "noid2");
        seed(&q, 10.0, "noid1"); // re-added: moves to the back

        assert_eq!(q.dequeue_if_ready().unwrap().unwrap().uuid, "noid3");
        assert_eq!(q.dequeue_if_ready().unwrap().unwrap().uuid, "noid2");
        assert_eq!(q.dequeue_if_ready().unwrap().unwrap().uuid, "noid1");
        assert!(q.dequeue_if_ready().unwrap().is_none());
    }

    // ── at-most-one dequeue ─────────────────────────────────────────

    #[test]
    fn racing_dequeues_yield_exactly_one_entry() {
        let q = Arc::new(queue(Duration::ZERO, 5));
        seed(&q, 1.0, "noid1");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || q.dequeue_if_ready().unwrap().is_some())
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(wins, 1);
    }

    // ── backoff ─────────────────────────────────────────────────────

    #[test]
    fn backoff_doubles_per_attempt() {
        let q = queue(Duration::ZERO, 5);
        assert_eq!(q.backoff(1), 20.0);
        for n in 1..8 {
            assert_eq!(q.backoff(n + 1), 2.0 * q.backoff(n));
        }
    }

    #[test]
    fn reschedule_scores_now_plus_backoff() {
        let q = queue(Duration::ZERO, 5);
        let entity = Entity::new("noid1", "items");
        let before = epoch_now();
        q.reschedule_with_backoff(&entity, 2).unwrap();
        let member = entity.to_member().unwrap();
        let score = q.store.score_of("test:queue", &member).unwrap();
        let expected = before + q.backoff(2);
        assert!((score - expected).abs() < 1.0, "score {score} vs {expected}");
    }

    // ── retry accounting ────────────────────────────────────────────

    #[test]
    fn record_failure_increments() {
        let q = queue(Duration::ZERO, 5);
        assert_eq!(q.current_attempt_count("noid1").unwrap(), 0);
        assert_eq!(q.record_failure("noid1").unwrap(), 1);
        assert_eq!(q.record_failure("noid1").unwrap(), 2);
        assert_eq!(q.current_attempt_count("noid1").unwrap(), 2);
    }

    #[test]
    fn exhaustion_raises_and_deletes_counter() {
        let q = queue(Duration::ZERO, 3);
        let entity = Entity::new("noid1", "items");
        for _ in 0..4 {
            q.record_failure("noid1").unwrap();
        }
        let err = q.reschedule_with_backoff(&entity, 4).unwrap_err();
        assert!(matches!(err, QueueError::MaxAttemptsExceeded { attempts: 4, .. }));
        assert_eq!(q.current_attempt_count("noid1").unwrap(), 0);
        // Nothing was re-added.
        assert!(q.dequeue_if_ready().unwrap().is_none());
    }

    #[test]
    fn malformed_member_surfaces_and_is_consumed() {
        let q = queue(Duration::ZERO, 5);
        q.store.add("test:queue", 1.0, "not json").unwrap();
        assert!(matches!(
            q.dequeue_if_ready().unwrap_err(),
            QueueError::MalformedMember { .. }
        ));
        assert!(q.dequeue_if_ready().unwrap().is_none());
    }

    #[test]
    fn wait_for_next_returns_none_on_shutdown() {
        let q = queue(Duration::ZERO, 5);
        let ctx = RunContext::new();
        ctx.request_shutdown();
        assert!(q.wait_for_next(&ctx).unwrap().is_none());
    }
}
