use crate::store::MemoryStore;
use crate::types::{hash_code, Value};
use dashmap::DashMap;
use std::sync::Arc;

/// Members of a single set, bucketed by their [`hash_code`].
///
/// Some notifications identify a removed member only by its hash code, so the code is the primary index. Colliding
/// members share a bucket.
#[derive(Debug, Default)]
pub struct SetMembers {
    buckets: DashMap<i32, Vec<Value>>,
}

impl SetMembers {
    pub fn insert(&self, member: Value) -> bool {
        let mut bucket = self.buckets.entry(hash_code(&member)).or_default();
        if bucket.contains(&member) {
            false
        }
        else {
            bucket.push(member);
            true
        }
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.buckets
            .get(&hash_code(member))
            .is_some_and(|bucket| bucket.iter().any(|m| m.as_ref() == member))
    }

    pub fn remove(&self, member: &[u8]) -> bool {
        let code = hash_code(member);
        let removed = match self.buckets.get_mut(&code) {
            Some(mut bucket) => match bucket.iter().position(|m| m.as_ref() == member) {
                Some(pos) => {
                    bucket.swap_remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            self.buckets.remove_if(&code, |_, bucket| bucket.is_empty());
        }
        removed
    }

    /// Drops every member with the given hash code, returning how many there were.
    pub fn remove_by_hash_code(&self, code: i32) -> usize {
        self.buckets.remove(&code).map_or(0, |(_, bucket)| bucket.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mirror of remote sets. Membership is cached opportunistically; a member missing from the mirror is not
/// necessarily missing from the remote set.
#[derive(Debug, Clone)]
pub struct MemorySets {
    store: Arc<MemoryStore>,
}

impl MemorySets {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    fn set(&self, key: &str) -> Option<Arc<SetMembers>> {
        self.store.get::<Arc<SetMembers>>(key)
    }

    fn set_or_create(&self, key: &str) -> Arc<SetMembers> {
        self.store.get_or_insert_with(key, || Arc::new(SetMembers::default()))
    }

    /// Caches members, returning how many of them were not cached before.
    pub fn add<I>(&self, key: &str, members: I) -> u64
    where
        I: IntoIterator<Item = Value>,
    {
        let set = self.set_or_create(key);
        members.into_iter().filter(|member| set.insert(member.clone())).count() as u64
    }

    pub fn contains(&self, key: &str, member: &[u8]) -> bool {
        self.set(key).is_some_and(|set| set.contains(member))
    }

    pub fn remove<I, M>(&self, key: &str, members: I) -> u64
    where
        I: IntoIterator<Item = M>,
        M: AsRef<[u8]>,
    {
        let Some(set) = self.set(key)
        else {
            return 0;
        };
        members.into_iter().filter(|member| set.remove(member.as_ref())).count() as u64
    }

    /// Removes members identified only by their hash codes.
    pub fn remove_by_hash_code(&self, key: &str, codes: &[i32]) -> u64 {
        let Some(set) = self.set(key)
        else {
            return 0;
        };
        codes.iter().map(|code| set.remove_by_hash_code(*code) as u64).sum()
    }

    /// Number of cached members.
    pub fn len(&self, key: &str) -> usize {
        self.set(key).map_or(0, |set| set.len())
    }
}
