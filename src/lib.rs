//! # keyspace-cache
//!
//! An in-process L1 mirror of a remote key-value store.
//!
//! Reads that hit the remote store are remembered locally, so repeated reads are served from memory. What makes it
//! usable with several processes sharing one remote store is that the mirror is kept consistent through pub/sub
//! keyspace notifications: whenever a key, hash field, or set member is changed by somebody else, the local copy is
//! evicted (or, for plain strings, refreshed).
//!
//! # The Basics
//!
//! - [`MemoryStore`](store::MemoryStore) is the type-erased, expiring key-value store at the bottom. It is built on
//!   top of the [moka](https://crates.io/crates/moka) cache; per-key TTLs are kept by the store itself.
//! - Typed mirrors are views over the store: [`MemoryStrings`](strings::MemoryStrings),
//!   [`MemoryHashes`](hashes::MemoryHashes), [`MemorySets`](sets::MemorySets), and
//!   [`MemorySortedSets`](sorted_sets::MemorySortedSets). Read-through operations take a fetch closure that is only
//!   awaited for what isn't cached.
//! - [`NotificationListener`](listener::NotificationListener) subscribes to two channel families. The plain one is the
//!   remote store's own keyspace events, of which only `expired` matters. The detailed one carries
//!   `originator:event[:argument]` payloads that cache-aware writers publish along with every change. Events
//!   originated by this very process are ignored.
//! - [`DatabaseInstance`](instance::DatabaseInstance) bundles all of the above for one remote database, and
//!   [`Registry`](registry::Registry) shares instances across the process.
//!
//! The crate doesn't depend on any particular client. The remote connection is abstracted by the
//! [`RemoteConnection`](traits::RemoteConnection) trait which the embedding application implements.
//!
//! ```ignore
//! let registry = Registry::new(ListenerConfig::builder().build()?);
//! let db = registry.get_or_create("primary/0", Some(connection))?;
//!
//! let fields = db
//!     .hashes()
//!     .get_multi("user:42", &["name", "email"], |missing| async move { client.hmget("user:42", missing).await })
//!     .await?;
//! ```
//!
//! Consistency is eventual. A notification may arrive after a local read has already returned a stale value; the
//! cache only guarantees that the stale value won't outlive the notification.

pub mod config;
pub mod entry;
pub mod error;
pub mod hashes;
pub mod instance;
pub mod listener;
pub mod notification;
pub mod process;
pub mod registry;
pub mod sets;
pub mod sorted_sets;
pub mod store;
pub mod strings;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use instance::DatabaseInstance;
#[doc(inline)]
pub use registry::Registry;
#[doc(inline)]
pub use store::MemoryStore;
#[doc(inline)]
pub use traits::RemoteConnection;

pub mod prelude {
    pub use crate::config::ListenerConfig;
    pub use crate::error::{CacheError, NotificationError};
    pub use crate::hashes::MemoryHashes;
    pub use crate::instance::{DatabaseInstance, Mirrors};
    pub use crate::listener::NotificationListener;
    pub use crate::registry::Registry;
    pub use crate::sets::MemorySets;
    pub use crate::sorted_sets::MemorySortedSets;
    pub use crate::store::MemoryStore;
    pub use crate::strings::MemoryStrings;
    pub use crate::traits::RemoteConnection;
    pub use crate::types::*;
}
