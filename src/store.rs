use crate::entry::StoreEntry;
use crate::types::When;
use moka::ops::compute::{CompResult, Op};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::any::Any;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Expiring, type-erased key-value store shared by all typed mirrors of a database.
///
/// Expiration is cooperative: the deadline is kept next to the value and checked whenever the key is read. An expired
/// entry behaves exactly like a missing one and is dropped on the first access that notices it. There is no sweeper;
/// the remote store reports expirations through keyspace notifications anyway.
///
/// ```ignore
/// let store = MemoryStore::new();
/// store.add("greeting", Value::from("hello"), Some(Duration::from_secs(10)), When::Always);
/// assert_eq!(store.get::<Value>("greeting"), Some(Value::from("hello")));
/// // Wrong shape reads as a miss.
/// assert!(store.get::<u64>("greeting").is_none());
/// ```
pub struct MemoryStore {
    cache: Cache<String, StoreEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::build_cache(None, None)
    }

    /// A store bounded to `max_capacity` entries. Evicted keys simply read as cache misses.
    pub fn with_capacity(name: &str, max_capacity: u64) -> Self {
        Self::build_cache(Some(name), Some(max_capacity))
    }

    fn build_cache(name: Option<&str>, max_capacity: Option<u64>) -> Self {
        let mut builder = Cache::<String, StoreEntry>::builder().eviction_policy(EvictionPolicy::tiny_lfu());
        if let Some(name) = name {
            builder = builder.name(name);
        }
        if let Some(max_capacity) = max_capacity {
            builder = builder.max_capacity(max_capacity);
        }
        Self { cache: builder.build() }
    }

    #[inline]
    pub fn name(&self) -> String {
        self.cache.name().unwrap_or("<anon>").to_string()
    }

    // Returns the entry only if it hasn't expired yet. Expired entries are removed on the way out unless somebody has
    // replaced them in the meantime.
    fn live(&self, key: &str) -> Option<StoreEntry> {
        let entry = self.cache.get(key)?;
        if entry.is_expired() {
            self.evict_expired(key);
            return None;
        }
        Some(entry)
    }

    fn evict_expired(&self, key: &str) {
        self.cache.entry(key.to_owned()).and_compute_with(|current| match current {
            Some(entry) if entry.value().is_expired() => Op::Remove,
            _ => Op::Nop,
        });
    }

    #[inline]
    fn holds<T: Any>(entry: &StoreEntry) -> bool {
        !entry.is_expired() && entry.value::<T>().is_some()
    }

    /// Stores `value` under `key` if `when` allows it against the current presence of the key. Any previous value and
    /// its TTL are replaced. Returns `true` if the value has been stored.
    pub fn add<T>(&self, key: &str, value: T, ttl: Option<Duration>, when: When) -> bool
    where
        T: Any + Send + Sync,
    {
        let entry = StoreEntry::with_ttl(value, ttl);
        let outcome = self.cache.entry(key.to_owned()).and_compute_with(|current| {
            let present = current.as_ref().is_some_and(|e| !e.value().is_expired());
            match (when, present) {
                (When::Always, _) | (When::Exists, true) | (When::NotExists, false) => Op::Put(entry),
                // A stale entry is of no use to anybody.
                _ if current.is_some() && !present => Op::Remove,
                _ => Op::Nop,
            }
        });
        matches!(outcome, CompResult::Inserted(_) | CompResult::ReplacedWith(_))
    }

    pub fn add_many<I, K, T>(&self, items: I, ttl: Option<Duration>, when: When) -> u64
    where
        I: IntoIterator<Item = (K, T)>,
        K: AsRef<str>,
        T: Any + Send + Sync,
    {
        let mut stored = 0;
        for (key, value) in items {
            if self.add(key.as_ref(), value, ttl, when) {
                stored += 1;
            }
        }
        stored
    }

    /// Replaces the value of an existing key, keeping its expiration deadline. Does nothing for a missing key.
    pub fn update<T>(&self, key: &str, value: T) -> bool
    where
        T: Any + Send + Sync,
    {
        let outcome = self.cache.entry(key.to_owned()).and_compute_with(|current| match current {
            Some(entry) if !entry.value().is_expired() => {
                Op::Put(StoreEntry::new(value, entry.value().expires_at()))
            }
            Some(_) => Op::Remove,
            None => Op::Nop,
        });
        matches!(outcome, CompResult::ReplacedWith(_))
    }

    /// Returns the value of `key` if it is present, not expired, and of type `T`.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Any,
    {
        self.live(key)?.value::<T>().cloned()
    }

    /// The value and the remaining TTL of `key`, both taken from the same entry. `None` as the TTL means the value never
    /// expires.
    pub fn get_with_ttl<T>(&self, key: &str) -> Option<(T, Option<Duration>)>
    where
        T: Clone + Any,
    {
        let entry = self.live(key)?;
        let value = entry.value::<T>()?.clone();
        Some((value, entry.remaining_ttl()))
    }

    /// Returns the value of type `T` under `key`, atomically storing the result of `init` (without expiration) if the
    /// key is missing, expired, or holds a value of another type.
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> T
    where
        T: Clone + Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get::<T>(key) {
            return value;
        }

        let fresh = init();
        let outcome = self.cache.entry(key.to_owned()).and_compute_with(|current| {
            if current.is_some_and(|entry| Self::holds::<T>(entry.value())) {
                Op::Nop
            }
            else {
                Op::Put(StoreEntry::new(fresh.clone(), None))
            }
        });

        match outcome {
            // Somebody else got there first.
            CompResult::Unchanged(entry) => entry.value().value::<T>().cloned().unwrap_or(fresh),
            _ => fresh,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// `None` if the key is absent; `Some(None)` if it is present and never expires.
    pub fn remaining_ttl(&self, key: &str) -> Option<Option<Duration>> {
        self.live(key).map(|entry| entry.remaining_ttl())
    }

    /// Re-stores the value of `key` with a new TTL. `None` removes the expiration, a zero TTL removes the key itself.
    /// Returns `false` if the key is absent.
    pub fn expire(&self, key: &str, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) if ttl.is_zero() => self.remove([key]) > 0,
            _ => self.reset_deadline(key, ttl.map(|ttl| Instant::now() + ttl)),
        }
    }

    /// Like [`expire`](Self::expire) but with an absolute deadline. A deadline that is not in the future removes the
    /// key.
    pub fn expire_at(&self, key: &str, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) if deadline <= Instant::now() => self.remove([key]) > 0,
            _ => self.reset_deadline(key, deadline),
        }
    }

    fn reset_deadline(&self, key: &str, expires_at: Option<Instant>) -> bool {
        let outcome = self.cache.entry(key.to_owned()).and_compute_with(|current| match current {
            Some(entry) if !entry.value().is_expired() => Op::Put(entry.value().rewrap(expires_at)),
            Some(_) => Op::Remove,
            None => Op::Nop,
        });
        matches!(outcome, CompResult::ReplacedWith(_))
    }

    /// Moves the value and the expiration deadline of `from` to `to`. Returns `false` if `from` is absent or both keys
    /// are the same.
    pub fn rename_key(&self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        let Some(entry) = self.live(from)
        else {
            return false;
        };

        trace!("[{}] RENAME({from} -> {to})", self.name());
        self.cache.insert(to.to_owned(), entry);
        self.cache.invalidate(from);
        true
    }

    /// Removes the keys, returning how many of them were actually present. Empty keys are ignored.
    pub fn remove<I, K>(&self, keys: I) -> u64
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut count = 0;
        for key in keys {
            let key = key.as_ref();
            if key.is_empty() {
                continue;
            }
            if self.cache.remove(key).is_some_and(|entry| !entry.is_expired()) {
                trace!("[{}] REMOVE({key})", self.name());
                count += 1;
            }
        }
        count
    }

    /// Drops all entries.
    pub fn flush(&self) {
        trace!("[{}] FLUSH", self.name());
        self.cache.invalidate_all();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name())
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}
