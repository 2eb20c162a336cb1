mod mem_store;
pub use mem_store::{MemStore, DEFAULT_STORE_CAPACITY, DEFAULT_SWEEP_GRACE_WINDOWS};

#[cfg(feature = "redis-store")]
pub mod redis_store;

use std::time::Duration;
use chrono::{DateTime, Utc};
use tracing::info;
use crate::config::{BackendSelector, LimitConfiguration};
use crate::error::StoreError;

/// [Limit] is an allowance of `requests` per `every` seconds.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Limit {
    pub requests: u64,
    pub every: u64,
}

impl Limit {
    pub fn new(requests: u64, every: u64) -> Self {
        Self { requests, every }
    }

    /// Length of one counting window.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.every)
    }
}

/// [Hit] is the state of a subject's counter right after
/// one [Store::check_and_incr].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Hit {
    /// Post-increment count in the current window.
    pub count: u64,
    pub limit: Limit,
    /// When the current window ends, if the store knows.
    pub reset_at: Option<DateTime<Utc>>,
}

impl Hit {
    pub fn admitted(&self) -> bool {
        self.count <= self.limit.requests
    }

    pub fn remaining(&self) -> u64 {
        self.limit.requests.saturating_sub(self.count)
    }
}

/// [Store] indicates the location and method of counting,
/// such as storing in memory ([MemStore]) in the form of a HashMap
/// or in Redis ([redis_store::RedisStore]) in the form of key-value pairs.
///
/// A store is the only owner of counter state. All methods are
/// implemented in an async manner.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// The [provision] function ensures a counter exists for `key`
    /// with the given [Limit], replacing a different stored limit.
    /// It is idempotent and never resets a running count.
    async fn provision(&self, key: &str, limit: Limit) -> Result<(), StoreError>;

    /// The [limit] function reads the provisioned [Limit] of `key`.
    /// `None` means `key` has never been provisioned (or was reaped).
    async fn limit(&self, key: &str) -> Result<Option<Limit>, StoreError>;

    /// The [check_and_incr] function atomically counts one request for
    /// `key` in the current window, opening a new window when the
    /// previous one has elapsed.
    ///
    /// Concurrent callers for the same `key` each observe a distinct count.
    async fn check_and_incr(&self, key: &str, limit: Limit) -> Result<Hit, StoreError>;
}

/// [Backend] is the store selected by the configuration at startup.
#[derive(Clone)]
pub enum Backend {
    Memory(MemStore),
    #[cfg(feature = "redis-store")]
    Redis(redis_store::RedisStore),
}

impl Backend {
    /// Builds the backend named by `config`.
    pub async fn connect(config: &LimitConfiguration) -> Result<Self, StoreError> {
        match config.backend() {
            BackendSelector::InMemory => {
                info!("counting requests in process memory");
                Ok(Self::Memory(MemStore::default()))
            }
            #[cfg(feature = "redis-store")]
            BackendSelector::Shared(settings) => {
                info!(address = %settings.address, db = settings.db, "counting requests in redis");
                Ok(Self::Redis(redis_store::RedisStore::connect(settings).await?))
            }
        }
    }
}

#[async_trait::async_trait]
impl Store for Backend {
    async fn provision(&self, key: &str, limit: Limit) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.provision(key, limit).await,
            #[cfg(feature = "redis-store")]
            Self::Redis(store) => store.provision(key, limit).await,
        }
    }

    async fn limit(&self, key: &str) -> Result<Option<Limit>, StoreError> {
        match self {
            Self::Memory(store) => store.limit(key).await,
            #[cfg(feature = "redis-store")]
            Self::Redis(store) => store.limit(key).await,
        }
    }

    async fn check_and_incr(&self, key: &str, limit: Limit) -> Result<Hit, StoreError> {
        match self {
            Self::Memory(store) => store.check_and_incr(key, limit).await,
            #[cfg(feature = "redis-store")]
            Self::Redis(store) => store.check_and_incr(key, limit).await,
        }
    }
}
