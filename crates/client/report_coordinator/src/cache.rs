//! A key/value store whose entries expire.
//!
//! Expiry is enforced in two ways which always agree: reads treat an entry whose
//! deadline has passed as absent (without removing it), and
//! [ExpiringCache::clear_expired] physically drops those entries. The latter is driven
//! periodically by an [IntervalCacheCleaner](crate::cache_cleaner::IntervalCacheCleaner).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// How long an entry lives once written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheExpiration {
    /// Use the default time-to-live the cache was created with.
    Default,
    Never,
    After(Duration),
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }
}

/// Thread-safe map where each entry carries an expiration deadline.
///
/// Readers and writers may share the cache freely behind an [Arc](std::sync::Arc): all
/// operations take `&self` and synchronize internally.
#[derive(Debug)]
pub struct ExpiringCache<K, V> {
    default_ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Inserts or replaces the value stored under `key`.
    pub fn set(&self, key: K, value: V, expiration: CacheExpiration) {
        let expires_at = self.deadline(expiration, Instant::now());
        self.write().insert(key, Entry { value, expires_at });
    }

    /// Inserts `value` only if there is no live entry for `key`.
    ///
    /// Returns true if the value was inserted. An expired entry counts as absent and is
    /// overwritten.
    pub fn set_if_absent(&self, key: K, value: V, expiration: CacheExpiration) -> bool {
        let now = Instant::now();
        let mut entries = self.write();
        if entries.get(&key).is_some_and(|entry| !entry.is_expired(now)) {
            return false;
        }
        entries.insert(key, Entry { value, expires_at: self.deadline(expiration, now) });
        true
    }

    /// Inserts `value` unless a live entry exists for which `replace` returns false.
    ///
    /// The check and the write happen under the same lock, so no other writer can slip
    /// in between them. Returns true if the value was written.
    pub fn set_with(&self, key: K, value: V, expiration: CacheExpiration, replace: impl FnOnce(&V, &V) -> bool) -> bool {
        let now = Instant::now();
        let mut entries = self.write();
        if let Some(existing) = entries.get(&key).filter(|entry| !entry.is_expired(now)) {
            if !replace(&existing.value, &value) {
                return false;
            }
        }
        entries.insert(key, Entry { value, expires_at: self.deadline(expiration, now) });
        true
    }

    /// Removes the entry stored under `key`, returning whether a live entry was removed.
    pub fn delete(&self, key: &K) -> bool {
        let now = Instant::now();
        self.write().remove(key).is_some_and(|entry| !entry.is_expired(now))
    }

    /// Drops every expired entry and returns how many were evicted.
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.read().values().filter(|entry| !entry.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deadline(&self, expiration: CacheExpiration, now: Instant) -> Option<Instant> {
        match expiration {
            CacheExpiration::Default => now.checked_add(self.default_ttl),
            CacheExpiration::Never => None,
            CacheExpiration::After(ttl) => now.checked_add(ttl),
        }
    }

    // A panic while holding the lock cannot leave a half-written entry behind, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Returns a copy of the live value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.read().get(key).filter(|entry| !entry.is_expired(now)).map(|entry| entry.value.clone())
    }
}
