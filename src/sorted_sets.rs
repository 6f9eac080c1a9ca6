use crate::store::MemoryStore;
use crate::types::{hash_code, Exclude, Value};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SortedIndex {
    by_score: BTreeSet<(OrderedFloat<f64>, Value)>,
    scores:   HashMap<Value, f64>,
    by_hash:  HashMap<i32, Vec<Value>>,
}

impl SortedIndex {
    fn insert(&mut self, member: Value, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.by_score.remove(&(OrderedFloat(old), member.clone()));
                self.by_score.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.by_hash.entry(hash_code(&member)).or_default().push(member.clone());
                self.by_score.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    fn remove(&mut self, member: &[u8]) -> bool {
        let Some((member, score)) = self.scores.remove_entry(member)
        else {
            return false;
        };

        let code = hash_code(&member);
        if let Some(bucket) = self.by_hash.get_mut(&code) {
            bucket.retain(|m| *m != member);
            if bucket.is_empty() {
                self.by_hash.remove(&code);
            }
        }
        self.by_score.remove(&(OrderedFloat(score), member));
        true
    }

    fn remove_by_hash_code(&mut self, code: i32) -> usize {
        let Some(bucket) = self.by_hash.remove(&code)
        else {
            return 0;
        };
        for member in &bucket {
            if let Some(score) = self.scores.remove(member) {
                self.by_score.remove(&(OrderedFloat(score), member.clone()));
            }
        }
        bucket.len()
    }

    fn delete_by_score(&mut self, min: f64, max: f64, exclude: Exclude) -> usize {
        let doomed: Vec<Value> = self
            .by_score
            .range((OrderedFloat(min), Value::new())..)
            .take_while(|(score, _)| score.0 <= max)
            .filter(|(score, _)| exclude.contains(min, max, score.0))
            .map(|(_, member)| member.clone())
            .collect();

        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }
}

/// Members of a single sorted set, ordered by score and indexed by [`hash_code`].
#[derive(Debug, Default)]
pub struct SortedMembers {
    index: RwLock<SortedIndex>,
}

impl SortedMembers {
    /// Returns `true` if the member is new; an existing member gets its score updated.
    pub fn insert(&self, member: Value, score: f64) -> bool {
        self.index.write().insert(member, score)
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.index.read().scores.get(member).copied()
    }

    pub fn remove(&self, member: &[u8]) -> bool {
        self.index.write().remove(member)
    }

    pub fn remove_by_hash_code(&self, code: i32) -> usize {
        self.index.write().remove_by_hash_code(code)
    }

    pub fn delete_by_score(&self, min: f64, max: f64, exclude: Exclude) -> usize {
        self.index.write().delete_by_score(min, max, exclude)
    }

    /// Cached members in ascending score order.
    pub fn entries(&self) -> Vec<(Value, f64)> {
        self.index
            .read()
            .by_score
            .iter()
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mirror of remote sorted sets.
#[derive(Debug, Clone)]
pub struct MemorySortedSets {
    store: Arc<MemoryStore>,
}

impl MemorySortedSets {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    fn sorted_set(&self, key: &str) -> Option<Arc<SortedMembers>> {
        self.store.get::<Arc<SortedMembers>>(key)
    }

    fn sorted_set_or_create(&self, key: &str) -> Arc<SortedMembers> {
        self.store
            .get_or_insert_with(key, || Arc::new(SortedMembers::default()))
    }

    /// Caches members with their scores. Returns the number of members that were not cached before.
    pub fn add<I>(&self, key: &str, entries: I) -> u64
    where
        I: IntoIterator<Item = (Value, f64)>,
    {
        let sorted_set = self.sorted_set_or_create(key);
        entries
            .into_iter()
            .filter(|(member, score)| sorted_set.insert(member.clone(), *score))
            .count() as u64
    }

    pub fn score(&self, key: &str, member: &[u8]) -> Option<f64> {
        self.sorted_set(key)?.score(member)
    }

    pub fn remove<I, M>(&self, key: &str, members: I) -> u64
    where
        I: IntoIterator<Item = M>,
        M: AsRef<[u8]>,
    {
        let Some(sorted_set) = self.sorted_set(key)
        else {
            return 0;
        };
        members
            .into_iter()
            .filter(|member| sorted_set.remove(member.as_ref()))
            .count() as u64
    }

    /// Removes members identified only by their hash code.
    pub fn remove_by_hash_code(&self, key: &str, code: i32) -> u64 {
        self.sorted_set(key)
            .map_or(0, |sorted_set| sorted_set.remove_by_hash_code(code) as u64)
    }

    /// Removes every cached member whose score falls within `min..max`, honoring `exclude` at either end.
    pub fn delete_by_score(&self, key: &str, min: f64, max: f64, exclude: Exclude) -> u64 {
        self.sorted_set(key)
            .map_or(0, |sorted_set| sorted_set.delete_by_score(min, max, exclude) as u64)
    }

    /// Cached members in ascending score order.
    pub fn entries(&self, key: &str) -> Vec<(Value, f64)> {
        self.sorted_set(key).map(|sorted_set| sorted_set.entries()).unwrap_or_default()
    }

    pub fn len(&self, key: &str) -> usize {
        self.sorted_set(key).map_or(0, |sorted_set| sorted_set.len())
    }
}
