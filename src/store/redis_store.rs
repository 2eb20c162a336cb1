use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use tracing::info;
use crate::config::SharedBackendSettings;
use crate::error::StoreError;
use crate::store::{Hit, Limit, Store, DEFAULT_SWEEP_GRACE_WINDOWS};

/// Counts one request and starts the expiry on the first one.
/// A counter found without expiry (left over by an older writer) gets one;
/// a running expiry is never touched. The limit hash is kept alive for
/// another retention period.
const CHECK_AND_INCR_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
redis.call('PEXPIRE', KEYS[2], ARGV[2])
return {count, ttl}
"#;

/// Writes the limit hash, replacing a different one, and sets its retention.
/// The counter is left alone.
const PROVISION_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1], 'requests', ARGV[1], 'every', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
"#;

/// Longest expiry handed to redis, in milliseconds (about 2000 years).
const MAX_EXPIRE_MS: u64 = 1 << 46;

/// `window` in milliseconds, clamped to [MAX_EXPIRE_MS].
fn expire_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).map_or(MAX_EXPIRE_MS, |ms| ms.min(MAX_EXPIRE_MS))
}

/// How long a limit hash outlives its last request.
fn retention_ms(limit: Limit) -> u64 {
    expire_ms(limit.window())
        .saturating_mul(u64::from(DEFAULT_SWEEP_GRACE_WINDOWS) + 1)
        .min(MAX_EXPIRE_MS)
}

/// [RedisStore] counts requests in redis, so that every instance
/// of the service shares one quota per subject.
///
/// Every round trip is bounded by the command timeout.
#[derive(Clone)]
pub struct RedisStore {
    pub(crate) inner: Arc<RedisStoreInner>,
}

impl RedisStore {
    /// Connect using the shared backend settings.
    pub async fn connect(settings: &SharedBackendSettings) -> Result<Self, StoreError> {
        let client = redis::Client::open(settings.url())?;
        Self::from_client(
            client,
            &settings.prefix,
            settings.connect_timeout(),
            settings.command_timeout(),
        ).await
    }

    /// create from a [redis::Client]
    pub async fn from_client<T: ToString>(
        client: redis::Client,
        prefix: T,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let conn = tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))??;

        let store = Self {
            inner: Arc::new(RedisStoreInner {
                conn,
                prefix: prefix.to_string(),
                command_timeout,
                check_and_incr: Script::new(CHECK_AND_INCR_SCRIPT),
                provision: Script::new(PROVISION_SCRIPT),
            }),
        };

        store.ping().await?;
        info!(prefix = %store.inner.prefix, "connected to redis");

        Ok(store)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.inner.conn();
        self.inner.bounded(redis::cmd("PING").query_async::<_, ()>(&mut conn)).await
    }
}

#[async_trait::async_trait]
impl Store for RedisStore {
    async fn provision(&self, key: &str, limit: Limit) -> Result<(), StoreError> {
        let mut invocation = self.inner.provision.key(self.inner.limit_key(key));
        invocation.arg(limit.requests).arg(limit.every).arg(retention_ms(limit));

        let mut conn = self.inner.conn();
        self.inner.bounded(invocation.invoke_async::<_, i64>(&mut conn)).await?;
        Ok(())
    }

    async fn limit(&self, key: &str) -> Result<Option<Limit>, StoreError> {
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(self.inner.limit_key(key)).arg("requests").arg("every");

        let mut conn = self.inner.conn();
        let fields = cmd.query_async::<_, (Option<u64>, Option<u64>)>(&mut conn);

        match self.inner.bounded(fields).await? {
            (Some(requests), Some(every)) => Ok(Some(Limit { requests, every })),
            (None, None) => Ok(None),
            (requests, every) => Err(StoreError::Corrupt(format!(
                "partial limit for {}: requests={:?}, every={:?}",
                key, requests, every,
            ))),
        }
    }

    async fn check_and_incr(&self, key: &str, limit: Limit) -> Result<Hit, StoreError> {
        let mut invocation = self.inner.check_and_incr.key(self.inner.count_key(key));
        invocation
            .key(self.inner.limit_key(key))
            .arg(expire_ms(limit.window()))
            .arg(retention_ms(limit));

        let mut conn = self.inner.conn();
        let (count, ttl_ms) = self.inner
            .bounded(invocation.invoke_async::<_, (i64, i64)>(&mut conn))
            .await?;
        if count < 1 {
            return Err(StoreError::Corrupt(format!("counter of {} is {}", key, count)));
        }

        let reset_at = chrono::Duration::try_milliseconds(ttl_ms.max(0))
            .and_then(|left| Utc::now().checked_add_signed(left));

        Ok(Hit {
            count: count as u64,
            limit,
            reset_at,
        })
    }
}

pub(crate) struct RedisStoreInner {
    /// multiplexed connection, reconnects on failure
    pub conn: ConnectionManager,
    /// the prefix which would prepend to redis-key
    pub prefix: String,
    pub command_timeout: Duration,
    pub check_and_incr: Script,
    pub provision: Script,
}

impl RedisStoreInner {
    pub fn limit_key<T: AsRef<str>>(&self, key: T) -> String {
        format!("{}:limit:{}", &self.prefix, key.as_ref())
    }

    pub fn count_key<T: AsRef<str>>(&self, key: T) -> String {
        format!("{}:count:{}", &self.prefix, key.as_ref())
    }

    pub fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Runs `fut` within the command timeout.
    pub async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
        where F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.command_timeout)),
        }
    }
}
