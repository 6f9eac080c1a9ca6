use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;
use std::time::Duration;

use crate::types::MessageStream;
use crate::types::Value;

/// The cache's view of a remote database connection.
///
/// The crate doesn't talk to the remote store by itself. The embedding application implements this trait on top of
/// whatever client it uses and the cache calls into it for two things: keyspace notifications and refreshing a string
/// value that has been overwritten by another process.
#[async_trait]
pub trait RemoteConnection: Sized + Send + Sync + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// The logical database number the connection is bound to. It is a part of keyspace channel names.
    fn database(&self) -> i64;

    /// Pattern-subscribe to a pub/sub channel family. Messages are expected to keep arriving on the returned stream
    /// until [`punsubscribe`](Self::punsubscribe) is called for the same pattern.
    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, Self::Error>;

    async fn punsubscribe(&self, pattern: &str) -> Result<(), Self::Error>;

    /// Fetch a string value together with its remaining TTL. `Ok(None)` if the key doesn't exist.
    async fn string_get_with_expiry(&self, key: &str) -> Result<Option<(Value, Option<Duration>)>, Self::Error>;
}
