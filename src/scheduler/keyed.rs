use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

enum Slot {
    /// Claimed by a caller that has not decided whether to arm yet
    Reserved,
    Armed(AbortHandle),
}

/// At most one pending one-shot task per key.
///
/// A key is claimed with [`reserve`](Self::reserve) (a second claim is
/// skipped). The returned [`Reservation`] is either
/// [`arm`](Reservation::arm)ed or dropped, which frees the key. An armed key
/// is cleared once its task has run.
pub struct KeyedTimers<K> {
    pending: Arc<Mutex<HashMap<K, Slot>>>,
}

impl<K> Clone for KeyedTimers<K> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<K> Default for KeyedTimers<K> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Claim on a key; released on drop unless armed
pub struct Reservation<K: Eq + Hash> {
    timers: KeyedTimers<K>,
    key: Option<K>,
}

impl<K> Reservation<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    /// Run `task` once after `delay`, then clear the key
    pub fn arm<F>(mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(key) = self.key.take() {
            self.timers.arm(key, delay, task);
        }
    }
}

impl<K: Eq + Hash> Drop for Reservation<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.timers.release(&key);
        }
    }
}

impl<K: Eq + Hash> KeyedTimers<K> {
    fn release(&self, key: &K) {
        let mut pending = self.lock();
        if matches!(pending.get(key), Some(Slot::Reserved)) {
            pending.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Slot>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K> KeyedTimers<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` if a task is already pending or reserved.
    pub fn reserve(&self, key: K) -> Option<Reservation<K>> {
        let mut pending = self.lock();
        if pending.contains_key(&key) {
            return None;
        }
        pending.insert(key.clone(), Slot::Reserved);
        Some(Reservation {
            timers: self.clone(),
            key: Some(key),
        })
    }

    fn arm<F>(&self, key: K, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Keep the map locked until the handle is stored so a task that
        // finishes immediately cannot clear the key before it is armed.
        let mut pending = self.lock();
        let map = Arc::clone(&self.pending);
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            map.lock().unwrap_or_else(|e| e.into_inner()).remove(&fired_key);
            debug!(key = ?fired_key, "timer fired");
        });
        pending.insert(key, Slot::Armed(handle.abort_handle()));
    }

    /// Drop every pending task without running it
    pub fn abort_all(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();
        for (_, slot) in pending.drain() {
            if let Slot::Armed(handle) = slot {
                handle.abort();
            }
        }
        count
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_reserve_collides_until_fired() {
        let timers = KeyedTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = timers.reserve(7u64).unwrap();
        assert!(timers.reserve(7u64).is_none());
        drop(timers.reserve(8u64).unwrap());
        assert!(!timers.is_pending(&8));

        let counter = Arc::clone(&fired);
        first.arm(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.reserve(7).is_none());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_pending(&7));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.len(), 0);
        assert!(timers.reserve(7).is_some());
    }

    #[tokio::test]
    async fn test_abandoned_reservation_frees_key() {
        let timers = KeyedTimers::new();
        let claim = timers.reserve("a").unwrap();

        // A cancelled caller drops its claim mid-await
        let cancelled = tokio::time::timeout(Duration::from_millis(10), async move {
            let _claim = claim;
            std::future::pending::<()>().await;
        })
        .await;
        assert!(cancelled.is_err());
        assert!(!timers.is_pending(&"a"));
        assert!(timers.reserve("a").is_some());
    }

    #[tokio::test]
    async fn test_armed_key_survives_until_aborted() {
        let timers = KeyedTimers::new();
        timers
            .reserve("a")
            .unwrap()
            .arm(Duration::from_secs(60), async {});
        assert!(timers.is_pending(&"a"));
        assert!(timers.reserve("a").is_none());

        assert_eq!(timers.abort_all(), 1);
        assert!(!timers.is_pending(&"a"));
    }
}
