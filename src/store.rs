use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    /// The store was unreachable at construction or ping time. Fatal:
    /// the process aborts startup rather than retrying.
    #[error("queue store unreachable: {0}")]
    Connection(String),

    #[error("queue store command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Command(err.to_string())
    }
}

/// The narrow slice of a sorted-set store the preservation queue needs.
/// All shared-state mutation goes through these operations; nothing else
/// in the crate is allowed to read-modify-write the same keys.
pub(crate) trait QueueStore: Send + Sync {
    fn ping(&self) -> Result<(), StoreError>;

    /// Add `member` with `score`, replacing any existing score for the
    /// same member (last-write-wins position).
    fn add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;

    /// Atomically remove and return the lowest-scored member, but only if
    /// its score is `<= max_score`. Uses optimistic concurrency: a racing
    /// writer aborts this pop and `None` comes back, leaving the caller to
    /// poll again. `None` also means "empty or nothing old enough".
    fn pop_lowest_if(&self, key: &str, max_score: f64) -> Result<Option<String>, StoreError>;

    /// Atomic counter increment; returns the post-increment value.
    fn increment(&self, key: &str) -> Result<u64, StoreError>;

    fn counter(&self, key: &str) -> Result<u64, StoreError>;

    fn remove_counter(&self, key: &str) -> Result<(), StoreError>;
}

// ── Redis-backed store ───────────────────────────────────────────────────

pub(crate) struct RedisStore {
    connection: Mutex<redis::Connection>,
}

impl RedisStore {
    /// Connect and verify the connection with a ping. Any failure here is
    /// a `StoreError::Connection`, which callers treat as fatal.
    pub(crate) fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let mut connection = client
            .get_connection()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query::<String>(&mut connection)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl QueueStore for RedisStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.with_connection(|con| {
            redis::cmd("PING")
                .query::<String>(con)
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            Ok(())
        })
    }

    fn add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        self.with_connection(|con| {
            redis::cmd("ZADD")
                .arg(key)
                .arg(score)
                .arg(member)
                .query::<()>(con)?;
            Ok(())
        })
    }

    fn pop_lowest_if(&self, key: &str, max_score: f64) -> Result<Option<String>, StoreError> {
        self.with_connection(|con| {
            // WATCH makes the ZREM conditional on nobody else touching the
            // set between our read and the EXEC.
            redis::cmd("WATCH").arg(key).query::<()>(con)?;
            let head: Vec<(String, f64)> = redis::cmd("ZRANGE")
                .arg(key)
                .arg(0)
                .arg(0)
                .arg("WITHSCORES")
                .query(con)?;

            match head.into_iter().next() {
                Some((member, score)) if score <= max_score => {
                    let removed: Option<(i64,)> = redis::pipe()
                        .atomic()
                        .cmd("ZREM")
                        .arg(key)
                        .arg(&member)
                        .query(con)?;
                    // EXEC returns nil when the watched key changed; the
                    // caller polls again rather than blocking.
                    Ok(removed.map(|_| member))
                }
                _ => {
                    redis::cmd("UNWATCH").query::<()>(con)?;
                    Ok(None)
                }
            }
        })
    }

    fn increment(&self, key: &str) -> Result<u64, StoreError> {
        self.with_connection(|con| {
            let value: u64 = redis::cmd("INCR").arg(key).query(con)?;
            Ok(value)
        })
    }

    fn counter(&self, key: &str) -> Result<u64, StoreError> {
        self.with_connection(|con| {
            let value: Option<u64> = redis::cmd("GET").arg(key).query(con)?;
            Ok(value.unwrap_or(0))
        })
    }

    fn remove_counter(&self, key: &str) -> Result<(), StoreError> {
        self.with_connection(|con| {
            redis::cmd("DEL").arg(key).query::<()>(con)?;
            Ok(())
        })
    }
}

// ── In-memory store (tests and local development) ────────────────────────

#[derive(Default)]
struct MemoryState {
    sets: HashMap<String, HashMap<String, f64>>,
    counters: HashMap<String, u64>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn score_of(&self, key: &str, member: &str) -> Option<f64> {
        self.locked().sets.get(key)?.get(member).copied()
    }
}

impl QueueStore for MemoryStore {
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        let mut state = self.locked();
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    fn pop_lowest_if(&self, key: &str, max_score: f64) -> Result<Option<String>, StoreError> {
        let mut state = self.locked();
        let Some(set) = state.sets.get_mut(key) else {
            return Ok(None);
        };
        // Ties break on the member string so iteration order is stable.
        let lowest = set
            .iter()
            .min_by(|(am, a), (bm, b)| a.total_cmp(b).then_with(|| am.cmp(bm)))
            .map(|(member, score)| (member.clone(), *score));
        match lowest {
            Some((member, score)) if score <= max_score => {
                set.remove(&member);
                Ok(Some(member))
            }
            _ => Ok(None),
        }
    }

    fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut state = self.locked();
        let value = state.counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn counter(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.locked().counters.get(key).copied().unwrap_or(0))
    }

    fn remove_counter(&self, key: &str) -> Result<(), StoreError> {
        self.locked().counters.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_updates_score_for_existing_member() {
        let store = MemoryStore::new();
        store.add("q", 1.0, "a").unwrap();
        store.add("q", 50.0, "a").unwrap();
        // Only one copy of "a" exists, at the updated score.
        assert_eq!(store.pop_lowest_if("q", 10.0).unwrap(), None);
        assert_eq!(store.pop_lowest_if("q", 50.0).unwrap(), Some("a".into()));
        assert_eq!(store.pop_lowest_if("q", 50.0).unwrap(), None);
    }

    #[test]
    fn pop_respects_threshold_and_order() {
        let store = MemoryStore::new();
        store.add("q", 3.0, "b").unwrap();
        store.add("q", 1.0, "a").unwrap();
        assert_eq!(store.pop_lowest_if("q", 0.5).unwrap(), None);
        assert_eq!(store.pop_lowest_if("q", 5.0).unwrap(), Some("a".into()));
        assert_eq!(store.pop_lowest_if("q", 5.0).unwrap(), Some("b".into()));
    }

    #[test]
    fn counters_increment_and_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.counter("c").unwrap(), 0);
        assert_eq!(store.increment("c").unwrap(), 1);
        assert_eq!(store.increment("c").unwrap(), 2);
        store.remove_counter("c").unwrap();
        assert_eq!(store.counter("c").unwrap(), 0);
    }
}
