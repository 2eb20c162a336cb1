//! Limit configuration.
//!
//! [Settings] mirrors the JSON file the service is configured with.
//! It is validated once into a [LimitConfiguration], which is immutable
//! and shared (behind an `Arc`) by the limiter and the middleware.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::error::ConfigError;
use crate::store::Limit;
use crate::subject::{Subject, SubjectKind};

/// Top-level shape of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub limiter: LimiterSettings,
    #[serde(default)]
    pub redis: SharedBackendSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimiterSettings {
    pub default: Option<RuleSettings>,
    #[serde(default)]
    pub tokens: Vec<TokenRuleSettings>,
    #[serde(default)]
    pub ips: Vec<IpRuleSettings>,
    #[serde(default)]
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RuleSettings {
    pub requests: u64,
    pub every: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRuleSettings {
    pub token: String,
    pub requests: u64,
    pub every: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpRuleSettings {
    pub ip: String,
    pub requests: u64,
    pub every: u64,
}

/// Backend selector. Exactly one of the two must be set.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    #[serde(default)]
    pub in_memory: bool,
    #[serde(default, alias = "shared")]
    pub redis: bool,
}

/// Connection parameters of the shared backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SharedBackendSettings {
    /// `host:port` of the redis server.
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
    /// Prepended to every key written by this service.
    pub prefix: String,
    pub connect_timeout_ms: u64,
    /// Upper bound of every round trip made while checking a request.
    pub command_timeout_ms: u64,
}

impl Default for SharedBackendSettings {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            username: None,
            password: None,
            db: 0,
            prefix: "actix-quota".to_string(),
            connect_timeout_ms: 5000,
            command_timeout_ms: 500,
        }
    }
}

impl SharedBackendSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// `redis://[user[:password]@]address/db`
    pub fn url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!("{}:{}@", user, password),
            (None, Some(password)) => format!(":{}@", password),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        format!("redis://{}{}/{}", auth, self.address, self.db)
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

/// One configured allowance: `requests` per `every` seconds for `subject`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RateRule {
    pub subject: Subject,
    pub limit: Limit,
}

/// Which counting backend the service runs with.
#[derive(Debug, Clone)]
pub enum BackendSelector {
    InMemory,
    #[cfg(feature = "redis-store")]
    Shared(SharedBackendSettings),
}

/// The validated, read-only ruleset.
#[derive(Debug, Clone)]
pub struct LimitConfiguration {
    token_rules: Vec<RateRule>,
    ip_rules: Vec<RateRule>,
    tokens: HashMap<String, Limit>,
    ips: HashMap<String, Limit>,
    default: Limit,
    backend: BackendSelector,
}

impl LimitConfiguration {
    /// Returns the explicitly configured limit of `subject`,
    /// falling back to the default rule.
    pub fn limit_for(&self, subject: &Subject) -> Limit {
        self.configured_limit(subject).unwrap_or(self.default)
    }

    /// Returns the limit of `subject` only if a rule names it.
    pub fn configured_limit(&self, subject: &Subject) -> Option<Limit> {
        match subject.kind {
            SubjectKind::Token => self.tokens.get(&subject.key).copied(),
            SubjectKind::Address => normalize_address(&subject.key)
                .ok()
                .and_then(|ip| self.ips.get(&ip).copied()),
        }
    }

    pub fn default_limit(&self) -> Limit {
        self.default
    }

    /// Token rules in configuration order.
    pub fn token_rules(&self) -> &[RateRule] {
        &self.token_rules
    }

    /// Address rules in configuration order.
    pub fn ip_rules(&self) -> &[RateRule] {
        &self.ip_rules
    }

    /// Every configured rule, tokens first.
    pub fn rules(&self) -> impl Iterator<Item = &RateRule> {
        self.token_rules.iter().chain(self.ip_rules.iter())
    }

    pub fn backend(&self) -> &BackendSelector {
        &self.backend
    }
}

impl TryFrom<Settings> for LimitConfiguration {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        let limiter = settings.limiter;

        let backend = match (limiter.database.in_memory, limiter.database.redis) {
            (true, false) => BackendSelector::InMemory,
            (false, true) => shared_backend(settings.redis)?,
            (false, false) => return Err(ConfigError::NoBackend),
            (true, true) => return Err(ConfigError::ConflictingBackends),
        };

        let default = limiter.default.ok_or(ConfigError::MissingDefault)?;
        let default = validated("default", default.requests, default.every)?;

        let mut token_rules = Vec::with_capacity(limiter.tokens.len());
        let mut tokens = HashMap::with_capacity(limiter.tokens.len());
        for rule in limiter.tokens {
            let limit = validated(&rule.token, rule.requests, rule.every)?;
            if tokens.insert(rule.token.clone(), limit).is_some() {
                return Err(ConfigError::DuplicateSubject(rule.token));
            }
            token_rules.push(RateRule { subject: Subject::token(rule.token), limit });
        }

        let mut ip_rules = Vec::with_capacity(limiter.ips.len());
        let mut ips = HashMap::with_capacity(limiter.ips.len());
        for rule in limiter.ips {
            let ip = normalize_address(&rule.ip)?;
            let limit = validated(&ip, rule.requests, rule.every)?;
            if ips.insert(ip.clone(), limit).is_some() {
                return Err(ConfigError::DuplicateSubject(ip));
            }
            ip_rules.push(RateRule { subject: Subject::address(ip), limit });
        }

        Ok(Self {
            token_rules,
            ip_rules,
            tokens,
            ips,
            default,
            backend,
        })
    }
}

#[cfg(feature = "redis-store")]
fn shared_backend(settings: SharedBackendSettings) -> Result<BackendSelector, ConfigError> {
    Ok(BackendSelector::Shared(settings))
}

#[cfg(not(feature = "redis-store"))]
fn shared_backend(_: SharedBackendSettings) -> Result<BackendSelector, ConfigError> {
    Err(ConfigError::BackendUnavailable("redis-store"))
}

/// Longest accepted window, in seconds (366 days).
pub const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 60 * 60;

fn validated(subject: &str, requests: u64, every: u64) -> Result<Limit, ConfigError> {
    if requests == 0 || every == 0 || every > MAX_WINDOW_SECONDS {
        return Err(ConfigError::InvalidRule {
            subject: subject.to_string(),
            requests,
            every,
        });
    }
    Ok(Limit { requests, every })
}

/// Canonical text form of an IP literal.
pub fn normalize_address(address: &str) -> Result<String, ConfigError> {
    address.trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ConfigError::InvalidAddress(address.to_string()))
}
