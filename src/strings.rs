use crate::store::MemoryStore;
use crate::types::{Value, When};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Mirror of remote string values. The value is stored as is, with its own TTL.
#[derive(Debug, Clone)]
pub struct MemoryStrings {
    store: Arc<MemoryStore>,
}

impl MemoryStrings {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get::<Value>(key)
    }

    /// The value and its remaining TTL; `None` as the TTL means the value never expires.
    pub fn get_with_expiry(&self, key: &str) -> Option<(Value, Option<Duration>)> {
        self.store.get_with_ttl::<Value>(key)
    }

    /// Read-through access: a cache miss awaits `fetch` for the value and its TTL and caches whatever it returns.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Option<Value>, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<(Value, Option<Duration>)>, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(Some(value));
        }

        Ok(match fetch(key.to_owned()).await? {
            Some((value, ttl)) => {
                self.set(key, value.clone(), ttl, When::Always);
                Some(value)
            }
            None => None,
        })
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>, when: When) -> bool {
        self.store.add(key, value, ttl, when)
    }

    pub fn set_many<I, K>(&self, items: I, ttl: Option<Duration>, when: When) -> u64
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.store.add_many(items, ttl, when)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.store.remove([key]) > 0
    }
}
