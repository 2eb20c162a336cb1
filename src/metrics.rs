use std::sync::Arc;
use prometheus::{Encoder, Histogram, HistogramOpts, HistogramTimer, IntCounterVec, Opts, Registry, TextEncoder};
use crate::limiter::Outcome;

/// Metrics collector for the rate limiter.
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    decisions: IntCounterVec,
    check_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics instance with its own registry.
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a metrics instance registering into `registry`.
    pub fn with_registry(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let decisions = IntCounterVec::new(
            Opts::new(
                "quota_decisions_total",
                "Number of rate limit checks by outcome",
            ),
            &["outcome"],
        )?;

        let check_duration = Histogram::with_opts(HistogramOpts::new(
            "quota_check_duration_seconds",
            "Duration of rate limit checks in seconds",
        ))?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(check_duration.clone()))?;

        // every outcome shows up, even before its first check
        for outcome in Outcome::ALL {
            decisions.with_label_values(&[outcome.as_str()]);
        }

        Ok(Self {
            registry,
            decisions,
            check_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of one check
    pub fn record(&self, outcome: Outcome) {
        self.decisions.with_label_values(&[outcome.as_str()]).inc();
    }

    /// Number of checks recorded with `outcome`.
    pub fn count(&self, outcome: Outcome) -> u64 {
        self.decisions.with_label_values(&[outcome.as_str()]).get()
    }

    /// Create a timer observing the duration of a check on drop
    pub fn start_check_timer(&self) -> HistogramTimer {
        self.check_duration.start_timer()
    }

    /// Renders the registry in the prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
