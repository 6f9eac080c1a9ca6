use fieldx::fxstruct;

/// Settings of a [`NotificationListener`](crate::listener::NotificationListener).
///
/// ```ignore
/// let config = ListenerConfig::builder()
///     .detailed_prefix("__keyspace_detailed")
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[fxstruct(no_new, builder, get)]
pub struct ListenerConfig {
    /// Prefix of the channel family carrying the remote store's own keyspace events.
    #[fieldx(default(String::from("__keyspace")), builder(into))]
    plain_prefix: String,

    /// Prefix of the channel family carrying detailed events published by cache-aware clients.
    #[fieldx(default(String::from("__keyspace_detailed")), builder(into))]
    detailed_prefix: String,

    /// Identity of this process. Detailed events originated by it are ignored.
    #[fieldx(default(crate::process::current_id().to_string()), builder(into))]
    process_id: String,
}

impl ListenerConfig {
    /// Channel name prefix of the plain family for database `db`; the key follows it.
    pub fn plain_channel(&self, db: i64) -> String {
        format!("{}@{db}__:", self.plain_prefix)
    }

    pub fn detailed_channel(&self, db: i64) -> String {
        format!("{}@{db}__:", self.detailed_prefix)
    }
}
