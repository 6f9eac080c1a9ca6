use crate::config::ListenerConfig;
use crate::error::CacheError;
use crate::instance::Mirrors;
use crate::notification::{DetailedEvent, DetailedMessage, PlainEvent};
use crate::traits::RemoteConnection;
use crate::types::{Message, When};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Plain,
    Detailed,
}

struct ListenerCore<C>
where
    C: RemoteConnection,
{
    connection:       Arc<C>,
    mirrors:          Mirrors,
    config:           ListenerConfig,
    runtime:          Handle,
    plain_channel:    String,
    detailed_channel: String,
    paused:           AtomicBool,
    // Subscription and refresh tasks. Once `stopped` is set under this lock no new task is added.
    tasks:            Mutex<Vec<JoinHandle<()>>>,
    stopped:          AtomicBool,
}

impl<C> ListenerCore<C>
where
    C: RemoteConnection,
{
    fn is_idle(&self) -> bool {
        self.paused.load(Ordering::Acquire) || self.stopped.load(Ordering::Acquire)
    }

    fn pattern(&self, family: Family) -> String {
        match family {
            Family::Plain => format!("{}*", self.plain_channel),
            Family::Detailed => format!("{}*", self.detailed_channel),
        }
    }

    async fn listen(self: Arc<Self>, family: Family) {
        let pattern = self.pattern(family);
        let mut stream = match self.connection.psubscribe(&pattern).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Can't subscribe to '{pattern}': {err}");
                return;
            }
        };

        debug!("Listening on '{pattern}'");
        while let Some(message) = stream.next().await {
            match family {
                Family::Plain => self.on_plain(&message),
                Family::Detailed => self.on_detailed(&message),
            }
        }
        debug!("Subscription '{pattern}' is closed");
    }

    #[instrument(level = "trace", skip(self))]
    fn on_plain(&self, message: &Message) {
        if self.is_idle() {
            return;
        }
        let Some(key) = message.channel.strip_prefix(self.plain_channel.as_str())
        else {
            return;
        };

        if PlainEvent::parse(&message.payload) == PlainEvent::Expired {
            trace!("EXPIRED({key})");
            self.mirrors.store().remove([key]);
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn on_detailed(&self, message: &Message) {
        if self.is_idle() {
            return;
        }
        let Some(key) = message.channel.strip_prefix(self.detailed_channel.as_str())
        else {
            return;
        };

        let detail = match DetailedMessage::split(&message.payload) {
            Ok(detail) => detail,
            Err(err) => {
                debug!("Skipping notification for '{key}': {err}");
                return;
            }
        };
        // Our own changes are already reflected in the local store.
        if detail.originator == self.config.process_id().as_str() {
            return;
        }

        match detail.decode() {
            Ok(Some(event)) => self.apply(key, event),
            Ok(None) => (),
            Err(err) => debug!("Skipping '{}' notification for '{key}': {err}", detail.event),
        }
    }

    fn apply(&self, key: &str, event: DetailedEvent) {
        trace!("APPLY({key}): {event:?}");
        match event {
            DetailedEvent::HashFieldChanged { field } => {
                self.mirrors.hashes().delete(key, &[field]);
            }
            DetailedEvent::SetMemberRemoved { hash_code } => {
                self.mirrors.sets().remove_by_hash_code(key, &[hash_code]);
            }
            DetailedEvent::SortedSetMemberAdded { hash_code } | DetailedEvent::SortedSetMemberChanged { hash_code } => {
                self.mirrors.sorted_sets().remove_by_hash_code(key, hash_code);
            }
            DetailedEvent::SortedSetRangeByScoreRemoved { min, max, exclude } => {
                self.mirrors.sorted_sets().delete_by_score(key, min, max, exclude);
            }
            DetailedEvent::KeyDeleted | DetailedEvent::StringMutated | DetailedEvent::SortedSetRangeRemoved => {
                self.mirrors.store().remove([key]);
            }
            DetailedEvent::ExpiryChanged => {
                self.mirrors.store().expire(key, None);
            }
            DetailedEvent::KeyRenamed { to } => {
                self.mirrors.store().rename_key(key, &to);
            }
            DetailedEvent::StringSet => self.refresh_string(key),
        }
    }

    // The new value is fetched in the background so a slow remote doesn't hold up the subscription.
    fn refresh_string(&self, key: &str) {
        let connection = Arc::clone(&self.connection);
        let strings = self.mirrors.strings().clone();
        let key = key.to_owned();

        let mut tasks = self.tasks.lock();
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        tasks.retain(|task| !task.is_finished());
        tasks.push(self.runtime.spawn(async move {
            match connection.string_get_with_expiry(&key).await {
                Ok(Some((value, ttl))) => {
                    strings.set(&key, value, ttl, When::Always);
                }
                Ok(None) => {
                    strings.remove(&key);
                }
                Err(err) => {
                    debug!("Can't refresh '{key}', dropping it: {err}");
                    strings.remove(&key);
                }
            }
        }));
    }

    // Returns the tasks to cancel; nothing is spawned afterwards.
    fn shut_down(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = self.tasks.lock();
        self.stopped.store(true, Ordering::Release);
        std::mem::take(&mut *tasks)
    }
}

/// Keeps the mirrors of one database consistent with changes made by other processes.
///
/// Two pattern subscriptions are held. The plain keyspace family only reports expirations the remote store performs on
/// its own. The detailed family carries `originator:event[:argument]` payloads published by cache-aware clients,
/// including this one; messages that originate from this process are ignored since the local store already has them.
///
/// Each subscription is served by its own task, so the two families may be processed concurrently while messages
/// within one family are handled in delivery order.
pub struct NotificationListener<C>
where
    C: RemoteConnection,
{
    core: Arc<ListenerCore<C>>,
}

impl<C> NotificationListener<C>
where
    C: RemoteConnection,
{
    /// Subscribes to both notification families of the connection's database. Must be called within a Tokio runtime.
    pub fn start(connection: Arc<C>, mirrors: Mirrors, config: ListenerConfig) -> Result<Self, CacheError> {
        let runtime = Handle::try_current()?;
        let database = connection.database();

        let core = Arc::new(ListenerCore {
            plain_channel: config.plain_channel(database),
            detailed_channel: config.detailed_channel(database),
            connection,
            mirrors,
            config,
            runtime: runtime.clone(),
            paused: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });

        core.tasks.lock().extend(
            [Family::Plain, Family::Detailed]
                .into_iter()
                .map(|family| runtime.spawn(Arc::clone(&core).listen(family))),
        );

        debug!("Notification listener started for database {database}");
        Ok(Self { core })
    }

    /// Processes a message of the plain keyspace family. Messages for other channels are ignored.
    pub fn handle_plain(&self, message: &Message) {
        self.core.on_plain(message);
    }

    /// Processes a message of the detailed keyspace family. Messages for other channels are ignored.
    pub fn handle_detailed(&self, message: &Message) {
        self.core.on_detailed(message);
    }

    /// While paused, incoming messages are dropped, not queued.
    pub fn set_paused(&self, paused: bool) {
        self.core.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.core.paused.load(Ordering::Acquire)
    }

    /// The channel prefix of the plain family, the key follows it.
    pub fn plain_channel(&self) -> &str {
        &self.core.plain_channel
    }

    pub fn detailed_channel(&self) -> &str {
        &self.core.detailed_channel
    }

    /// Stops delivery, cancels pending string refreshes, and releases both subscriptions. Once stopped, the listener
    /// never touches the mirrors again. Unsubscription failures are logged and otherwise ignored.
    pub async fn stop(&self) {
        let tasks = self.core.shut_down();
        for task in tasks {
            task.abort();
            // An aborted task resolves to a cancellation error.
            let _ = task.await;
        }

        for family in [Family::Plain, Family::Detailed] {
            let pattern = self.core.pattern(family);
            if let Err(err) = self.core.connection.punsubscribe(&pattern).await {
                warn!("Can't unsubscribe from '{pattern}': {err}");
            }
        }
        debug!("Notification listener stopped");
    }
}

impl<C> Drop for NotificationListener<C>
where
    C: RemoteConnection,
{
    fn drop(&mut self) {
        for task in self.core.shut_down() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test::{eventually, MockConnection};
    use crate::types::{hash_code, Exclude, Value};
    use std::time::Duration;

    const DETAILED: &str = "__keyspace_detailed@0__:";
    const PLAIN: &str = "__keyspace@0__:";

    struct Fixture {
        connection: Arc<MockConnection>,
        mirrors:    Mirrors,
        listener:   NotificationListener<MockConnection>,
    }

    impl Fixture {
        async fn new() -> Self {
            let connection = Arc::new(MockConnection::new(0));
            let mirrors = Mirrors::new(Arc::new(MemoryStore::new()));
            let config = ListenerConfig::builder().process_id("me").build().unwrap();
            let listener = NotificationListener::start(Arc::clone(&connection), mirrors.clone(), config).unwrap();
            connection.wait_for_subscriptions(2).await;
            Self {
                connection,
                mirrors,
                listener,
            }
        }

        fn detailed(&self, key: &str, payload: &str) {
            self.listener
                .handle_detailed(&Message::new(format!("{DETAILED}{key}"), payload));
        }

        fn plain(&self, key: &str, payload: &str) {
            self.listener.handle_plain(&Message::new(format!("{PLAIN}{key}"), payload));
        }

        fn hash(&self, key: &str, fields: &[&str]) {
            self.mirrors.hashes().set(
                key,
                fields.iter().map(|f| (f.to_string(), Value::from(f.to_string()))),
                When::Always,
            );
        }
    }

    #[tokio::test]
    async fn test_channels() {
        let fixture = Fixture::new().await;
        assert_eq!(fixture.listener.plain_channel(), PLAIN);
        assert_eq!(fixture.listener.detailed_channel(), DETAILED);
        let mut patterns = fixture.connection.subscriptions();
        patterns.sort();
        assert_eq!(patterns, vec!["__keyspace@0__:*", "__keyspace_detailed@0__:*"]);
    }

    #[tokio::test]
    async fn test_hash_field_invalidation() {
        let fixture = Fixture::new().await;
        fixture.hash("H", &["a", "b"]);

        fixture.detailed("H", "other:hset:a");
        assert!(!fixture.mirrors.hashes().contains("H", "a"));
        assert!(fixture.mirrors.hashes().contains("H", "b"));

        fixture.detailed("H", "other:hincrbyfloat:b");
        assert!(!fixture.mirrors.hashes().contains("H", "b"));
    }

    #[tokio::test]
    async fn test_own_messages_ignored() {
        let fixture = Fixture::new().await;
        let mirrors = &fixture.mirrors;
        fixture.hash("H", &["a"]);
        mirrors.sets().add("S", [Value::from("x")]);
        mirrors
            .sorted_sets()
            .add("Z", [(Value::from("m"), 1.0), (Value::from("n"), 2.0)]);
        mirrors
            .strings()
            .set("K", Value::from("v"), Some(Duration::from_secs(60)), When::Always);
        fixture.connection.set_value("K", Value::from("remote"), None);

        let set_member = hash_code(b"x");
        let sorted_member = hash_code(b"m");
        let mut notifications = Vec::new();
        for event in ["hset", "hdel", "hincr", "hincrbyfloat", "hdecr", "hdecrbyfloat"] {
            notifications.push(("H", format!("{event}:a")));
        }
        notifications.push(("S", format!("srem:{set_member}")));
        for event in ["zadd", "zrem", "zincr", "zdecr"] {
            notifications.push(("Z", format!("{event}:{sorted_member}")));
        }
        notifications.push(("Z", "zremrangebyscore:0-10-0".to_string()));
        for event in ["zremrangebyrank", "zremrangebylex"] {
            notifications.push(("Z", format!("{event}:0-1")));
        }
        for event in [
            "del",
            "getdel",
            "expire",
            "set",
            "setbit",
            "setrange",
            "incrby",
            "incrbyfloat",
            "decrby",
            "decrbyfloat",
            "append",
        ] {
            notifications.push(("K", event.to_string()));
        }
        for key in ["H", "S", "Z", "K"] {
            notifications.push((key, format!("rename_key:{key}-moved")));
        }

        for (key, rest) in &notifications {
            fixture.detailed(key, &format!("me:{rest}"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(mirrors.hashes().contains("H", "a"));
        assert!(mirrors.sets().contains("S", b"x"));
        assert_eq!(
            mirrors.sorted_sets().entries("Z"),
            vec![(Value::from("m"), 1.0), (Value::from("n"), 2.0)]
        );
        let (value, ttl) = mirrors.strings().get_with_expiry("K").unwrap();
        assert_eq!(value, Value::from("v"));
        assert!(ttl.is_some());
        for key in ["H-moved", "S-moved", "Z-moved", "K-moved"] {
            assert!(!mirrors.store().contains_key(key));
        }

        // The same notifications from anybody else do act.
        fixture.detailed("K", "other:del");
        assert_eq!(mirrors.strings().get("K"), None);
    }

    #[tokio::test]
    async fn test_paused() {
        let fixture = Fixture::new().await;
        fixture.hash("H", &["a"]);

        fixture.listener.set_paused(true);
        assert!(fixture.listener.is_paused());
        fixture.detailed("H", "other:hdel:a");
        fixture.plain("H", "expired");
        assert!(fixture.mirrors.hashes().contains("H", "a"));

        // Messages dropped while paused are not replayed.
        fixture.listener.set_paused(false);
        assert!(fixture.mirrors.hashes().contains("H", "a"));
        fixture.detailed("H", "other:hdel:a");
        assert!(!fixture.mirrors.hashes().contains("H", "a"));
    }

    #[tokio::test]
    async fn test_plain_expired() {
        let fixture = Fixture::new().await;
        fixture.mirrors.strings().set("k", Value::from("v"), None, When::Always);

        fixture.plain("k", "del");
        assert!(fixture.mirrors.store().contains_key("k"));
        fixture.plain("k", "expired");
        assert!(!fixture.mirrors.store().contains_key("k"));
    }

    #[tokio::test]
    async fn test_foreign_channel_ignored() {
        let fixture = Fixture::new().await;
        fixture.mirrors.strings().set("k", Value::from("v"), None, When::Always);

        fixture
            .listener
            .handle_detailed(&Message::new("__keyspace_detailed@1__:k", "other:del"));
        fixture.listener.handle_plain(&Message::new("__keyspace@1__:k", "expired"));
        assert!(fixture.mirrors.store().contains_key("k"));
    }

    #[tokio::test]
    async fn test_set_members() {
        let fixture = Fixture::new().await;
        fixture
            .mirrors
            .sets()
            .add("S", [Value::from("x"), Value::from("y")]);

        fixture.detailed("S", &format!("other:srem:{}", hash_code(b"x")));
        assert!(!fixture.mirrors.sets().contains("S", b"x"));
        assert!(fixture.mirrors.sets().contains("S", b"y"));
    }

    #[tokio::test]
    async fn test_sorted_set_members() {
        let fixture = Fixture::new().await;
        let sorted_sets = fixture.mirrors.sorted_sets();
        sorted_sets.add(
            "Z",
            [
                (Value::from("a"), 1.0),
                (Value::from("b"), 5.0),
                (Value::from("c"), 9.0),
                (Value::from("d"), 12.0),
            ],
        );

        fixture.detailed("Z", &format!("other:zadd:{}", hash_code(b"a")));
        fixture.detailed("Z", &format!("other:zincr:{}", hash_code(b"d")));
        assert_eq!(
            sorted_sets.entries("Z"),
            vec![(Value::from("b"), 5.0), (Value::from("c"), 9.0)]
        );

        fixture.detailed("Z", &format!("other:zremrangebyscore:5-9-{}", Exclude::Stop as i32));
        assert_eq!(sorted_sets.entries("Z"), vec![(Value::from("c"), 9.0)]);

        fixture.detailed("Z", "other:zremrangebyrank:0-1");
        assert!(!fixture.mirrors.store().contains_key("Z"));
    }

    #[tokio::test]
    async fn test_key_events() {
        let fixture = Fixture::new().await;
        let strings = fixture.mirrors.strings();
        strings.set("a", Value::from("1"), None, When::Always);
        strings.set("b", Value::from("2"), None, When::Always);
        strings.set("c", Value::from("3"), Some(Duration::from_secs(60)), When::Always);

        fixture.detailed("a", "other:getdel");
        assert_eq!(strings.get("a"), None);

        fixture.detailed("b", "other:append:tail");
        assert_eq!(strings.get("b"), None);

        fixture.detailed("c", "other:expire");
        assert_eq!(strings.get_with_expiry("c"), Some((Value::from("3"), None)));

        fixture.detailed("c", "other:rename_key:d");
        assert_eq!(strings.get("c"), None);
        assert_eq!(strings.get("d"), Some(Value::from("3")));
    }

    #[tokio::test]
    async fn test_malformed_skipped() {
        let fixture = Fixture::new().await;
        fixture.hash("H", &["a"]);

        for payload in [
            "nocolon",
            "other:srem:notanumber",
            "other:zremrangebyscore:1-2",
            "other:zremrangebyscore:1-2-9",
            "other:rename_key",
            "other:lpush:x",
        ] {
            fixture.detailed("H", payload);
        }
        assert!(fixture.mirrors.hashes().contains("H", "a"));

        fixture.detailed("H", "other:hdel:a");
        assert!(!fixture.mirrors.hashes().contains("H", "a"));
    }

    #[tokio::test]
    async fn test_string_set_refresh() {
        let fixture = Fixture::new().await;
        let strings = fixture.mirrors.strings().clone();
        strings.set("k", Value::from("old"), None, When::Always);
        fixture
            .connection
            .set_value("k", Value::from("new"), Some(Duration::from_secs(30)));

        fixture.detailed("k", "other:set");
        assert!(eventually(|| strings.get("k") == Some(Value::from("new"))).await);
        let (_, ttl) = strings.get_with_expiry("k").unwrap();
        assert!(ttl.is_some_and(|ttl| ttl <= Duration::from_secs(30)));

        fixture.connection.remove_value("k");
        fixture.detailed("k", "other:set");
        assert!(eventually(|| strings.get("k").is_none()).await);
    }

    #[tokio::test]
    async fn test_string_set_refresh_failure() {
        let fixture = Fixture::new().await;
        let strings = fixture.mirrors.strings().clone();
        strings.set("k", Value::from("old"), None, When::Always);
        fixture.connection.set_value("k", Value::from("new"), None);
        fixture.connection.set_failing(true);

        fixture.detailed("k", "other:set");
        assert!(eventually(|| strings.get("k").is_none()).await);
    }

    #[tokio::test]
    async fn test_delivery_over_subscription() {
        let fixture = Fixture::new().await;
        fixture.hash("H", &["a", "b"]);
        fixture.mirrors.strings().set("k", Value::from("v"), None, When::Always);

        assert_eq!(fixture.connection.publish(&format!("{DETAILED}H"), "other:hset:a"), 1);
        assert_eq!(fixture.connection.publish(&format!("{PLAIN}k"), "expired"), 1);

        let mirrors = fixture.mirrors.clone();
        assert!(eventually(|| !mirrors.hashes().contains("H", "a") && !mirrors.store().contains_key("k")).await);
        assert!(mirrors.hashes().contains("H", "b"));
    }

    #[tokio::test]
    async fn test_stop() {
        let fixture = Fixture::new().await;
        fixture.listener.stop().await;
        assert!(fixture.connection.subscriptions().is_empty());
        assert_eq!(fixture.connection.unsubscribed().len(), 2);
        assert_eq!(fixture.connection.publish(&format!("{PLAIN}k"), "expired"), 0);

        fixture.mirrors.strings().set("k", Value::from("v"), None, When::Always);
        fixture.detailed("k", "other:del");
        fixture.plain("k", "expired");
        assert_eq!(fixture.mirrors.strings().get("k"), Some(Value::from("v")));
    }

    #[tokio::test]
    async fn test_stop_cancels_refresh() {
        let fixture = Fixture::new().await;
        let strings = fixture.mirrors.strings().clone();
        fixture.connection.set_value("k", Value::from("late"), None);
        fixture.connection.set_read_delay(Some(Duration::from_millis(50)));

        fixture.detailed("k", "other:set");
        tokio::task::yield_now().await;
        fixture.listener.stop().await;
        fixture.mirrors.store().flush();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(strings.get("k"), None);

        // Nothing new is started once stopped.
        fixture.connection.set_read_delay(None);
        fixture.detailed("k", "other:set");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(strings.get("k"), None);
    }
}
