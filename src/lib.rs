//! # `actix-quota`: per-subject request quotas for `actix-web`

//! ## Description
//! `actix-quota` is a RateLimit middleware for the `actix-web` library.
//! Every request is attributed to a subject, either the API token it
//! carries or its client address, and counted against the quota
//! configured for that subject. Subjects without a rule of their own get
//! the default quota the first time they are seen.

//! Counting is done with fixed windows, in one of two stores:
//! in-memory storage (`MemStore`) for a single instance, or Redis
//! storage (`RedisStore`) for instances sharing one quota.

//! ## Features
//! |    Feature    |  Component   |                                    Description                                    |
//! |:-------------:|:------------:|:---------------------------------------------------------------------------------:|
//! |   `default`   |  `MemStore`  |                               Store data in memory                                |
//! | `redis-store` | `RedisStore` | Store data using a connection manager from [redis](https://crates.io/crates/redis) |
//! |   `metrics`   |  `Metrics`   |      Count check outcomes with [prometheus](https://crates.io/crates/prometheus)    |

//! `redis-store` and `metrics` are enabled by default.

//! ## Usage
//! 1. Load [config::Settings] and validate them into a [config::LimitConfiguration].
//! 2. Connect the [store::Backend] the configuration selects, wrap it in a
//!    [limiter::RateLimiter] and provision the configured subjects.
//! 3. Add a [middleware::RateLimit] to your HTTP Server using the `wrap` function (from `actix-web`).
//!    A [controller::Controller] customises subject resolution and the rejection response.

//! ```rust,ignore
//! let settings = actix_quota::config::Settings::from_file("config.json")?;
//! let config = Arc::new(LimitConfiguration::try_from(settings)?);
//! let store = actix_quota::store::Backend::connect(&config).await?;
//!
//! let limiter = Arc::new(RateLimiter::new(config, store));
//! limiter.provision_configured().await;
//!
//! HttpServer::new(move || {
//!     App::new()
//!         .wrap(RateLimit::new_default(limiter.clone()))
//!         // ...
//! })
//! ```

//! A request carrying the `API_KEY` header is checked against the token
//! rules, whatever its address. If the store fails, the request is
//! rejected.

//! ### Examples
//! You can find a runnable server in the `demos` folder.

pub mod config;
pub mod controller;
pub mod error;
pub mod limiter;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod middleware;
pub mod store;
pub mod subject;
pub mod utils;

pub use config::{LimitConfiguration, Settings};
pub use error::{ConfigError, StoreError};
pub use limiter::{Decision, Outcome, RateLimiter};
pub use middleware::RateLimit;
pub use subject::{Subject, SubjectKind};
