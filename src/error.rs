use std::time::Duration;
use thiserror::Error;

/// [ConfigError] is fatal: the service must not start serving
/// traffic with a configuration that produced one.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no counter backend selected (set database.inMemory or database.redis)")]
    NoBackend,

    #[error("both counter backends selected, pick exactly one")]
    ConflictingBackends,

    #[error("shared backend selected but `{0}` feature is not enabled")]
    BackendUnavailable(&'static str),

    #[error("no default rule configured")]
    MissingDefault,

    #[error("invalid rule for {subject}: requests={requests}, every={every} (both must be positive, every at most 366 days)")]
    InvalidRule {
        subject: String,
        requests: u64,
        every: u64,
    },

    #[error("`{0}` is not an IP address")]
    InvalidAddress(String),

    #[error("subject {0} is configured more than once")]
    DuplicateSubject(String),

    #[error("cannot read configuration: {0}")]
    Read(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// [StoreError] is a failure of the counting backend itself.
/// It is never used to signal that a limit was exceeded.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected store reply: {0}")]
    Corrupt(String),

    #[error("subject {0} is still unknown after provisioning")]
    Unprovisioned(String),
}
