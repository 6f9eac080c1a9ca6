use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A single slot of [`MemoryStore`](crate::store::MemoryStore).
///
/// The value is type-erased; each reader states the shape it expects and gets nothing back if the slot holds
/// something else. Entries are never mutated in place: an update replaces the whole entry.
#[derive(Clone)]
pub struct StoreEntry {
    value:      Arc<dyn Any + Send + Sync>,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    pub fn new<T>(value: T, expires_at: Option<Instant>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            value: Arc::new(value),
            expires_at,
        }
    }

    pub(crate) fn with_ttl<T>(value: T, ttl: Option<Duration>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::new(value, ttl.map(|ttl| Instant::now() + ttl))
    }

    // Same value, different deadline. The value itself is shared, not copied.
    pub(crate) fn rewrap(&self, expires_at: Option<Instant>) -> Self {
        Self {
            value: Arc::clone(&self.value),
            expires_at,
        }
    }

    pub fn value<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= Instant::now())
    }

    /// `None` means the entry never expires.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Debug for StoreEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEntry")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
