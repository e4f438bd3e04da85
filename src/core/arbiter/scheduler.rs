//! Keyed, cancelable deferred actions.
//!
//! The scheduler only owns the timer registry. It is meant to live inside the
//! same lock as the state its actions mutate: an action re-acquires that lock
//! when it wakes up and calls [`DebounceScheduler::fire`] to prove it is still
//! the live timer for its key before touching anything.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Identity of one armed timer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct PendingTimer {
    id: TimerId,
    handle: JoinHandle<()>,
}

pub struct DebounceScheduler<K> {
    timers: HashMap<K, PendingTimer>,
    next_id: u64,
}

impl<K> DebounceScheduler<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Runs `action` after `delay` unless the key is cancelled or re-armed
    /// first. Re-arming aborts the previous instance for the same key.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, key: K, delay: Duration, action: F) -> TimerId
    where
        F: FnOnce(TimerId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.next_id = self.next_id.wrapping_add(1);
        let id = TimerId(self.next_id);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            action(id).await;
        });

        if let Some(previous) = self.timers.insert(key, PendingTimer { id, handle }) {
            previous.handle.abort();
        }
        id
    }

    /// Claims the timer `id` for `key`. Returns `false` if it was cancelled or
    /// replaced in the meantime, in which case the caller must not act.
    pub fn fire(&mut self, key: &K, id: TimerId) -> bool {
        match self.timers.get(key) {
            Some(pending) if pending.id == id => {
                self.timers.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_where<P>(&mut self, mut predicate: P) -> usize
    where
        P: FnMut(&K) -> bool,
    {
        let doomed: Vec<K> = self
            .timers
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &doomed {
            self.cancel(key);
        }
        doomed.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, pending) in self.timers.drain() {
            pending.handle.abort();
        }
        count
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<K> Default for DebounceScheduler<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for DebounceScheduler<K> {
    fn drop(&mut self) {
        for pending in self.timers.values() {
            pending.handle.abort();
        }
    }
}
