use thiserror::Error;

/// Reasons for skipping a detailed keyspace notification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotificationError {
    #[error("payload has no originator separator: '{0}'")]
    MissingOriginator(String),

    #[error("invalid member hash code '{0}'")]
    InvalidHashCode(String),

    #[error("invalid score range '{0}'")]
    InvalidScoreRange(String),

    #[error("invalid range exclusion flag {0}")]
    InvalidExclude(i32),
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// A notification listener spawns its delivery tasks on the current Tokio runtime.
    #[error("notification listener requires a running Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
