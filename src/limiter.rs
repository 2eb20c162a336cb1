//! The rate limiter engine.
//!
//! [RateLimiter] resolves the limit of a [Subject], provisions subjects
//! it has never seen, and counts the request in the configured [Store].
//! Store failures never reach the caller: the request is rejected and
//! the fault is logged. With the `metrics` feature, every outcome is
//! counted in a [Metrics] registry.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use crate::config::LimitConfiguration;
use crate::error::StoreError;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::store::{Hit, Limit, Store};
use crate::subject::Subject;

/// [Decision] is the verdict on one request.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Decision {
    pub admitted: bool,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the current window ends, if known.
    pub reset_at: Option<DateTime<Utc>>,
}

impl Decision {
    /// The verdict when the store could not be consulted.
    pub fn fail_closed() -> Self {
        Self {
            admitted: false,
            remaining: 0,
            reset_at: None,
        }
    }
}

impl From<Hit> for Decision {
    fn from(hit: Hit) -> Self {
        Self {
            admitted: hit.admitted(),
            remaining: hit.remaining(),
            reset_at: hit.reset_at,
        }
    }
}

/// How a check ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    Admitted,
    Rejected,
    /// Rejected because the store failed.
    StorageFault,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Admitted, Outcome::Rejected, Outcome::StorageFault];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Admitted => "admitted",
            Outcome::Rejected => "rejected",
            Outcome::StorageFault => "storage_fault",
        }
    }
}

pub struct RateLimiter<S: Store> {
    config: Arc<LimitConfiguration>,
    store: S,
    #[cfg(feature = "metrics")]
    metrics: Option<Metrics>,
}

impl<S: Store> RateLimiter<S> {
    pub fn new(config: Arc<LimitConfiguration>, store: S) -> Self {
        Self {
            config,
            store,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Counts the outcome of every check in `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    pub fn config(&self) -> &LimitConfiguration {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers every explicitly configured subject with its limit.
    ///
    /// Failures are logged and skipped: such a subject is provisioned
    /// on its first request instead. Returns how many were registered.
    pub async fn provision_configured(&self) -> usize {
        let mut provisioned = 0;

        for rule in self.config.rules() {
            match self.store.provision(&rule.subject.storage_key(), rule.limit).await {
                Ok(()) => provisioned += 1,
                Err(e) => warn!(subject = %rule.subject, error = %e, "failed to provision subject"),
            }
        }

        debug!(provisioned, "provisioned configured subjects");
        provisioned
    }

    /// Counts one request of `subject` and tells whether it is admitted.
    pub async fn check_limit(&self, subject: &Subject) -> bool {
        self.check(subject).await.admitted
    }

    /// Like [Self::check_limit], with the counter state of the verdict.
    pub async fn check(&self, subject: &Subject) -> Decision {
        #[cfg(feature = "metrics")]
        let _timer = self.metrics.as_ref().map(Metrics::start_check_timer);

        match self.try_check(subject).await {
            Ok(hit) => {
                let decision = Decision::from(hit);
                debug!(
                    subject = %subject,
                    count = hit.count,
                    limit = hit.limit.requests,
                    admitted = decision.admitted,
                    "checked rate limit"
                );
                self.record(if decision.admitted { Outcome::Admitted } else { Outcome::Rejected });
                decision
            }
            Err(e) => {
                self.record(Outcome::StorageFault);
                warn!(subject = %subject, error = %e, "rate limit store failed, rejecting request");
                Decision::fail_closed()
            }
        }
    }

    #[cfg(feature = "metrics")]
    fn record(&self, outcome: Outcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record(outcome);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record(&self, _: Outcome) {}

    async fn try_check(&self, subject: &Subject) -> Result<Hit, StoreError> {
        let key = subject.storage_key();
        let limit = self.resolve_limit(subject, &key).await?;
        self.store.check_and_incr(&key, limit).await
    }

    /// Reads the limit of `key`, provisioning it once when unknown.
    async fn resolve_limit(&self, subject: &Subject, key: &str) -> Result<Limit, StoreError> {
        if let Some(limit) = self.store.limit(key).await? {
            return Ok(limit);
        }

        let limit = self.config.limit_for(subject);
        debug!(subject = %subject, requests = limit.requests, every = limit.every, "provisioning unseen subject");
        self.store.provision(key, limit).await?;

        self.store.limit(key).await?
            .ok_or_else(|| StoreError::Unprovisioned(key.to_string()))
    }
}
