//! In this example, we load limits from `demos/config.json` (or the file
//! named by the first argument) and serve `/hello` behind the middleware.
//!
//! Try `curl -i localhost:8080/hello` and `curl -i -H 'API_KEY: abc' localhost:8080/hello`,
//! then `curl localhost:8080/metrics` for the outcome counters.

use std::sync::Arc;
use std::time::Duration;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use tracing::info;
use tracing_subscriber::EnvFilter;
use actix_quota::{controller, LimitConfiguration, RateLimit, RateLimiter, Settings};
use actix_quota::metrics::Metrics;
use actix_quota::store::{Backend, DEFAULT_SWEEP_GRACE_WINDOWS};
use actix_quota::utils::RateLimitPassed;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "demos/config.json".to_string());

    // an invalid configuration stops us here, before serving anything
    let settings = Settings::from_file(&path)?;
    let config = Arc::new(LimitConfiguration::try_from(settings)?);

    let store = Backend::connect(&config).await?;
    if let Backend::Memory(store) = &store {
        store.spawn_sweeper(Duration::from_secs(30), DEFAULT_SWEEP_GRACE_WINDOWS);
    }

    let metrics = Metrics::new()?;
    let limiter = Arc::new(RateLimiter::new(config, store).with_metrics(metrics.clone()));
    let provisioned = limiter.provision_configured().await;
    info!(provisioned, config = %path, "rate limiter ready");

    // actix-web simple http-server starts here...
    HttpServer::new(move || {
        // create a default controller which controls request handling.
        let controller = controller::Controller::default()
            .on_success(|_, subject, decision| {
                info!(subject = %subject, remaining = decision.remaining, "request admitted");
            });

        // metrics are scraped outside the quota
        let metrics_resource = web::resource("/metrics")
            .app_data(web::Data::new(metrics.clone()))
            .route(web::get().to(render_metrics));

        App::new()
            .service(metrics_resource)
            .service(
                web::scope("")
                    .wrap(RateLimit::new(limiter.clone(), controller))
                    .service(web::resource("/hello").route(web::get().to(hello_world)))
            )
    })
        .bind("0.0.0.0:8080")?
        .run()
        .await?;

    Ok(())
}

async fn hello_world(req: HttpRequest) -> String {
    match RateLimitPassed::of(&req) {
        Some(passed) => format!("Hello, {}!", passed.subject()),
        None => "Hello, World!".to_string(),
    }
}

async fn render_metrics(metrics: web::Data<Metrics>) -> HttpResponse {
    match metrics.encode() {
        Ok(text) => HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(text),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}
