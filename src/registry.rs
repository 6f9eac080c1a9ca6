use crate::config::ListenerConfig;
use crate::error::CacheError;
use crate::instance::DatabaseInstance;
use crate::traits::RemoteConnection;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Process-wide table of [`DatabaseInstance`]s keyed by a caller-chosen database identity.
///
/// Lookups only take a shared lock. Creation, removal, and disposal are serialized so that concurrent callers asking
/// for the same identity end up with one instance.
pub struct Registry<C>
where
    C: RemoteConnection,
{
    config:    ListenerConfig,
    instances: RwLock<HashMap<String, Arc<DatabaseInstance<C>>>>,
}

impl<C> Registry<C>
where
    C: RemoteConnection,
{
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn get(&self, id: &str) -> Option<Arc<DatabaseInstance<C>>> {
        self.instances.read().get(id).cloned()
    }

    /// Returns the instance registered under `id`, creating it if there is none.
    ///
    /// The connection is only used when the instance is created; the first creator wins and later callers get the
    /// existing instance regardless of the connection they pass.
    pub fn get_or_create(&self, id: &str, connection: Option<Arc<C>>) -> Result<Arc<DatabaseInstance<C>>, CacheError> {
        if let Some(instance) = self.get(id) {
            return Ok(instance);
        }

        let mut instances = self.instances.write();
        if let Some(instance) = instances.get(id) {
            return Ok(Arc::clone(instance));
        }

        let instance = Arc::new(DatabaseInstance::new(connection, &self.config)?);
        instances.insert(id.to_owned(), Arc::clone(&instance));
        debug!("Registered database instance '{id}'");
        Ok(instance)
    }

    /// Unregisters the instance without disposing it. Whoever still holds it keeps a working cache.
    pub fn remove(&self, id: &str) -> Option<Arc<DatabaseInstance<C>>> {
        let removed = self.instances.write().remove(id);
        if removed.is_some() {
            debug!("Unregistered database instance '{id}'");
        }
        removed
    }

    /// Disposes every registered instance and empties the registry.
    pub async fn dispose_all(&self) {
        let instances = std::mem::take(&mut *self.instances.write());
        for (id, instance) in instances {
            instance.dispose().await;
            debug!("Disposed database instance '{id}'");
        }
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

impl<C> Debug for Registry<C>
where
    C: RemoteConnection,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.instances.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("instances", &ids)
            .finish()
    }
}
