use crate::config::ListenerConfig;
use crate::error::CacheError;
use crate::hashes::MemoryHashes;
use crate::listener::NotificationListener;
use crate::sets::MemorySets;
use crate::sorted_sets::MemorySortedSets;
use crate::store::MemoryStore;
use crate::strings::MemoryStrings;
use crate::traits::RemoteConnection;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// The typed mirrors of a database. They are all views over the same [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct Mirrors {
    store:       Arc<MemoryStore>,
    strings:     MemoryStrings,
    hashes:      MemoryHashes,
    sets:        MemorySets,
    sorted_sets: MemorySortedSets,
}

impl Mirrors {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            strings: MemoryStrings::new(Arc::clone(&store)),
            hashes: MemoryHashes::new(Arc::clone(&store)),
            sets: MemorySets::new(Arc::clone(&store)),
            sorted_sets: MemorySortedSets::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn strings(&self) -> &MemoryStrings {
        &self.strings
    }

    pub fn hashes(&self) -> &MemoryHashes {
        &self.hashes
    }

    pub fn sets(&self) -> &MemorySets {
        &self.sets
    }

    pub fn sorted_sets(&self) -> &MemorySortedSets {
        &self.sorted_sets
    }
}

/// Everything the cache keeps for one remote database: the store, its typed mirrors, and the listener keeping them
/// in line with changes made by other processes.
pub struct DatabaseInstance<C>
where
    C: RemoteConnection,
{
    mirrors:  Mirrors,
    listener: Option<NotificationListener<C>>,
}

impl<C> DatabaseInstance<C>
where
    C: RemoteConnection,
{
    /// Without a connection the instance is a purely local cache; nothing keeps it consistent with the remote store.
    /// With one, a notification listener is started on the current Tokio runtime.
    pub fn new(connection: Option<Arc<C>>, config: &ListenerConfig) -> Result<Self, CacheError> {
        let mirrors = Mirrors::new(Arc::new(MemoryStore::new()));
        let listener = match connection {
            Some(connection) => Some(NotificationListener::start(connection, mirrors.clone(), config.clone())?),
            None => None,
        };

        Ok(Self { mirrors, listener })
    }

    pub fn mirrors(&self) -> &Mirrors {
        &self.mirrors
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        self.mirrors.store()
    }

    pub fn strings(&self) -> &MemoryStrings {
        self.mirrors.strings()
    }

    pub fn hashes(&self) -> &MemoryHashes {
        self.mirrors.hashes()
    }

    pub fn sets(&self) -> &MemorySets {
        self.mirrors.sets()
    }

    pub fn sorted_sets(&self) -> &MemorySortedSets {
        self.mirrors.sorted_sets()
    }

    pub fn listener(&self) -> Option<&NotificationListener<C>> {
        self.listener.as_ref()
    }

    /// Suspends or resumes notification processing. No-op for an instance without a listener.
    pub fn set_paused(&self, paused: bool) {
        if let Some(listener) = &self.listener {
            listener.set_paused(paused);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.listener.as_ref().is_some_and(|listener| listener.is_paused())
    }

    /// Stops the listener, releasing its subscriptions, and drops all cached data.
    pub async fn dispose(&self) {
        if let Some(listener) = &self.listener {
            listener.stop().await;
        }
        self.mirrors.store().flush();
        debug!("Database instance disposed");
    }
}

impl<C> Debug for DatabaseInstance<C>
where
    C: RemoteConnection,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseInstance")
            .field("store", self.mirrors.store())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::MockConnection;
    use crate::types::{Value, When};

    fn config() -> ListenerConfig {
        ListenerConfig::builder().process_id("me").build().unwrap()
    }

    #[test]
    fn test_mirrors_share_store() {
        let instance = DatabaseInstance::<MockConnection>::new(None, &config()).unwrap();
        instance.hashes().set("H", [("a".to_string(), Value::from("1"))], When::Always);
        assert!(instance.store().contains_key("H"));

        instance.store().remove(["H"]);
        assert!(!instance.hashes().contains("H", "a"));
        assert!(instance.listener().is_none());
        assert!(!instance.is_paused());
    }

    #[test]
    fn test_listener_needs_runtime() {
        let outcome = DatabaseInstance::new(Some(Arc::new(MockConnection::new(0))), &config());
        assert!(matches!(outcome, Err(CacheError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_dispose() {
        let connection = Arc::new(MockConnection::new(2));
        let instance = DatabaseInstance::new(Some(Arc::clone(&connection)), &config()).unwrap();
        connection.wait_for_subscriptions(2).await;

        instance.strings().set("k", Value::from("v"), None, When::Always);
        instance.set_paused(true);
        assert!(instance.is_paused());

        instance.dispose().await;
        assert!(!instance.store().contains_key("k"));
        assert!(connection.subscriptions().is_empty());
        let mut released = connection.unsubscribed();
        released.sort();
        assert_eq!(released, vec!["__keyspace@2__:*", "__keyspace_detailed@2__:*"]);
    }

    #[tokio::test]
    async fn test_dispose_outlives_slow_refresh() {
        let connection = Arc::new(MockConnection::new(0));
        let instance = DatabaseInstance::new(Some(Arc::clone(&connection)), &config()).unwrap();
        connection.wait_for_subscriptions(2).await;
        connection.set_value("k", Value::from("late"), None);
        connection.set_read_delay(Some(std::time::Duration::from_millis(50)));

        let listener = instance.listener().unwrap();
        listener.handle_detailed(&crate::types::Message::new("__keyspace_detailed@0__:k", "other:set"));
        instance.dispose().await;
        assert_eq!(instance.strings().get("k"), None);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(instance.strings().get("k"), None);
    }
}
