//! Time-evicting session storage.
//!
//! Entries are shared `Arc` values stamped with the last time they were
//! touched. Load-or-create runs under the map's entry lock, so concurrent
//! first packets for one key observe a single value, and an entry that has
//! already outlived the timeout is replaced instead of handed back. Loading
//! an existing entry does not refresh it; callers [`touch`](SessionTable::touch)
//! once the traffic that loaded it has been accepted.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct Slot<V> {
    value: Arc<V>,
    last_seen: Mutex<Instant>,
}

impl<V> Slot<V> {
    fn new(value: Arc<V>, now: Instant) -> Self {
        Self {
            value,
            last_seen: Mutex::new(now),
        }
    }

    fn touch(&self, now: Instant) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        let last = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last) >= timeout
    }
}

/// Concurrent map whose entries expire after an idle timeout.
pub struct SessionTable<K, V> {
    entries: DashMap<K, Slot<V>>,
    timeout: Duration,
}

impl<K: Eq + Hash + Clone, V> SessionTable<K, V> {
    /// Table evicting entries idle for `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    /// Idle timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return the live value for `key`, creating it with `create` if absent
    /// or expired. The flag is `true` when this call created the value.
    ///
    /// An existing live value keeps its last-seen stamp.
    ///
    /// # Errors
    ///
    /// Propagates the error from `create`; nothing is stored in that case.
    pub fn load_or_create<E>(
        &self,
        key: K,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<(Arc<V>, bool), E> {
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expired(now, self.timeout) {
                    let value = Arc::new(create()?);
                    occupied.insert(Slot::new(value.clone(), now));
                    Ok((value, true))
                } else {
                    Ok((occupied.get().value.clone(), false))
                }
            }
            Entry::Vacant(vacant) => {
                let value = Arc::new(create()?);
                vacant.insert(Slot::new(value.clone(), now));
                Ok((value, true))
            }
        }
    }

    /// Live value for `key`, without refreshing it.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.entries.get(key)?;
        if slot.expired(Instant::now(), self.timeout) {
            return None;
        }
        Some(slot.value.clone())
    }

    /// Whether a live value exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Mark `key` as used now.
    pub fn touch(&self, key: &K) {
        if let Some(slot) = self.entries.get(key) {
            slot.touch(Instant::now());
        }
    }

    /// Remove `key` unconditionally.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    /// Remove `key` only while it still maps to `value`.
    pub fn remove_value(&self, key: &K, value: &Arc<V>) -> bool {
        self.entries
            .remove_if(key, |_, slot| Arc::ptr_eq(&slot.value, value))
            .is_some()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| !slot.expired(now, self.timeout));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table() -> SessionTable<u64, String> {
        SessionTable::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_load_or_create_once() {
        let table = table();
        let (first, created) = table
            .load_or_create(7, || Ok::<_, Infallible>("a".to_string()))
            .unwrap();
        assert!(created);
        let (second, created) = table
            .load_or_create(7, || Ok::<_, Infallible>("b".to_string()))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, "a");
    }

    #[tokio::test]
    async fn test_failed_create_stores_nothing() {
        let table = table();
        let result = table.load_or_create(1, || Err::<String, _>("nope"));
        assert_eq!(result.unwrap_err(), "nope");
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_refresh() {
        let table = table();
        table
            .load_or_create(1, || Ok::<_, Infallible>("one".to_string()))
            .unwrap();
        table
            .load_or_create(2, || Ok::<_, Infallible>("two".to_string()))
            .unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        table.touch(&2);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(table.get(&1).is_none());
        assert!(table.contains(&2));
        assert_eq!(table.evict_expired(), 1);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_replaced_not_returned() {
        let table = table();
        let (old, _) = table
            .load_or_create(5, || Ok::<_, Infallible>("old".to_string()))
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let (fresh, created) = table
            .load_or_create(5, || Ok::<_, Infallible>("new".to_string()))
            .unwrap();
        assert!(created);
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(!table.remove_value(&5, &old));
        assert!(table.remove_value(&5, &fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_does_not_refresh() {
        let table = table();
        table
            .load_or_create(3, || Ok::<_, Infallible>("three".to_string()))
            .unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;

        let (_, created) = table
            .load_or_create(3, || Ok::<_, Infallible>("other".to_string()))
            .unwrap();
        assert!(!created);
        tokio::time::advance(Duration::from_secs(21)).await;

        assert!(!table.contains(&3));
        assert_eq!(table.evict_expired(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_share_one_value() {
        let table = Arc::new(table());
        let creations = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            let creations = creations.clone();
            handles.push(tokio::spawn(async move {
                table
                    .load_or_create(99, || {
                        creations.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Infallible>("shared".to_string())
                    })
                    .unwrap()
                    .0
            }));
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
