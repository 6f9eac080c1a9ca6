use crate::store::MemoryStore;
use crate::types::{Value, When};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// In-memory field map of a single hash. A `None` value marks a field the remote store reported as absent.
pub type HashFields = DashMap<String, Option<Value>>;

/// Mirror of remote hashes.
///
/// Individual fields are cached opportunistically: whatever has been read from or written to the remote store is
/// kept, and whatever is missing is fetched on demand. There is no notion of a "complete" hash, which is why
/// [`get_all`](Self::get_all) always goes to the remote store.
#[derive(Debug, Clone)]
pub struct MemoryHashes {
    store: Arc<MemoryStore>,
}

impl MemoryHashes {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    fn hash(&self, hash_key: &str) -> Option<Arc<HashFields>> {
        self.store.get::<Arc<HashFields>>(hash_key)
    }

    fn hash_or_create(&self, hash_key: &str) -> Arc<HashFields> {
        self.store
            .get_or_insert_with(hash_key, || Arc::new(HashFields::new()))
    }

    /// Fetches the entire hash from the remote store and replaces the cached field map with the result. The expiration
    /// deadline of an already cached hash is kept.
    ///
    /// If `fetch` fails the cache is left as it was.
    pub async fn get_all<F, Fut, E>(&self, hash_key: &str, fetch: F) -> Result<Vec<(String, Value)>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<(String, Value)>, E>>,
    {
        let entries = fetch().await?;
        let fields: HashFields = entries
            .iter()
            .map(|(field, value)| (field.clone(), Some(value.clone())))
            .collect();
        trace!("HGETALL({hash_key}) cached {} fields", fields.len());

        let fields = Arc::new(fields);
        if !self.store.update(hash_key, Arc::clone(&fields)) {
            self.store.add(hash_key, fields, None, When::Always);
        }
        Ok(entries)
    }

    /// Returns a single field, fetching and caching it if it is not cached yet. A field found absent is cached as such
    /// and not fetched again.
    pub async fn get<F, Fut, E>(&self, hash_key: &str, field: &str, fetch: F) -> Result<Option<Value>, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<Value>, E>>,
    {
        let hash = self.hash_or_create(hash_key);
        if let Some(cached) = hash.get(field).map(|v| v.value().clone()) {
            return Ok(cached);
        }

        let fetched = fetch(field.to_owned()).await?;
        hash.insert(field.to_owned(), fetched.clone());
        Ok(fetched)
    }

    /// Returns the requested fields in the order they were asked for.
    ///
    /// Only the fields missing from the cache are passed to `fetch_missing`, which must answer with one slot per
    /// requested field, in the same order. Every slot it returns gets cached, empty ones included, so a field known to
    /// be absent is not asked for again. A `None` batch means the remote store had nothing to say; the missing slots
    /// then stay empty and nothing is cached.
    pub async fn get_multi<S, F, Fut, E>(
        &self,
        hash_key: &str,
        fields: &[S],
        fetch_missing: F,
    ) -> Result<Vec<Option<Value>>, E>
    where
        S: AsRef<str>,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Option<Vec<Option<Value>>>, E>>,
    {
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let hash = self.hash_or_create(hash_key);
        let mut result = Vec::with_capacity(fields.len());
        let mut missing = Vec::new();

        for (idx, field) in fields.iter().enumerate() {
            match hash.get(field.as_ref()) {
                Some(cached) => result.push(cached.value().clone()),
                None => {
                    missing.push(idx);
                    result.push(None);
                }
            }
        }

        if missing.is_empty() {
            return Ok(result);
        }

        let missing_fields = missing.iter().map(|&idx| fields[idx].as_ref().to_owned()).collect();
        let Some(fetched) = fetch_missing(missing_fields).await?
        else {
            return Ok(result);
        };

        for (idx, value) in missing.into_iter().zip(fetched) {
            hash.insert(fields[idx].as_ref().to_owned(), value.clone());
            result[idx] = value;
        }

        Ok(result)
    }

    /// The cached value of a field, without going to the remote store.
    pub fn get_cached(&self, hash_key: &str, field: &str) -> Option<Value> {
        self.hash(hash_key)?.get(field)?.value().clone()
    }

    /// Whether anything is cached for the field, including the knowledge that it is absent.
    pub fn contains(&self, hash_key: &str, field: &str) -> bool {
        self.hash(hash_key).is_some_and(|hash| hash.contains_key(field))
    }

    /// Writes fields into the cached hash.
    ///
    /// With [`When::Exists`] a field counts as existing only if its value is cached locally; the remote store may think
    /// otherwise. A field cached as absent counts as not existing. [`When::NotExists`] counts every entry, whether it
    /// was inserted or not.
    pub fn set<I>(&self, hash_key: &str, entries: I, when: When) -> u64
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let hash = self.hash_or_create(hash_key);
        let mut count = 0;

        for (field, value) in entries {
            match when {
                When::Always => {
                    hash.insert(field, Some(value));
                    count += 1;
                }
                When::Exists => {
                    if let Some(mut slot) = hash.get_mut(&field) {
                        if slot.is_some() {
                            *slot = Some(value);
                            count += 1;
                        }
                    }
                }
                When::NotExists => {
                    let mut slot = hash.entry(field).or_insert(None);
                    if slot.is_none() {
                        *slot = Some(value);
                    }
                    count += 1;
                }
            }
        }

        count
    }

    /// Removes fields from the cached hash, returning how many were actually cached.
    pub fn delete<S>(&self, hash_key: &str, fields: &[S]) -> u64
    where
        S: AsRef<str>,
    {
        let Some(hash) = self.hash(hash_key)
        else {
            return 0;
        };

        fields
            .iter()
            .filter(|field| hash.remove(field.as_ref()).is_some())
            .count() as u64
    }
}
