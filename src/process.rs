use std::sync::LazyLock;
use uuid::Uuid;

static PROCESS_ID: LazyLock<String> = LazyLock::new(|| Uuid::new_v4().simple().to_string());

/// Identity of the current process, as embedded by cache-aware clients into detailed keyspace events.
///
/// Generated once per process; every cache instance in the process shares it.
pub fn current_id() -> &'static str {
    &PROCESS_ID
}
