use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use actix_web::{App, HttpResponse, test, web};
use actix_web::http::StatusCode;
use actix_quota::{LimitConfiguration, RateLimit, RateLimiter, Settings, Subject};
use actix_quota::controller::DEFAULT_TOKEN_HEADER;
use actix_quota::store::{Backend, Limit, Store};

const CONFIG: &str = r#"
{
    "limiter": {
        "default": { "requests": 5, "every": 1 },
        "tokens": [{ "token": "abc", "requests": 4, "every": 1 }],
        "ips": [{ "ip": "10.0.0.5", "requests": 2, "every": 1 }],
        "database": { "inMemory": true, "redis": false }
    }
}
"#;

async fn limiter() -> anyhow::Result<Arc<RateLimiter<Backend>>> {
    let config = Arc::new(LimitConfiguration::try_from(Settings::from_json_str(CONFIG)?)?);
    let store = Backend::connect(&config).await?;
    let limiter = Arc::new(RateLimiter::new(config, store));
    limiter.provision_configured().await;
    Ok(limiter)
}

async fn ok() -> HttpResponse {
    HttpResponse::Ok().finish()
}

fn addr(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 40000)
}

#[tokio::test(start_paused = true)]
async fn configured_and_default_address_limits() -> anyhow::Result<()> {
    let limiter = limiter().await?;

    let configured = Subject::address("10.0.0.5");
    let verdicts: Vec<bool> = [
        limiter.check_limit(&configured).await,
        limiter.check_limit(&configured).await,
        limiter.check_limit(&configured).await,
    ].into();
    assert_eq!(verdicts, vec![true, true, false]);

    let unlisted = Subject::address("10.0.0.99");
    let mut verdicts = Vec::new();
    for _ in 0..6 {
        verdicts.push(limiter.check_limit(&unlisted).await);
    }
    assert_eq!(verdicts, vec![true, true, true, true, true, false]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_window_resets() -> anyhow::Result<()> {
    let limiter = limiter().await?;
    let subject = Subject::token("abc");

    for _ in 0..4 {
        assert!(limiter.check_limit(&subject).await);
    }
    assert!(!limiter.check_limit(&subject).await);

    tokio::time::advance(Duration::from_millis(999)).await;
    assert!(!limiter.check_limit(&subject).await);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(limiter.check_limit(&subject).await);

    Ok(())
}

#[tokio::test]
async fn startup_provisions_configured_subjects() -> anyhow::Result<()> {
    let limiter = limiter().await?;

    assert_eq!(limiter.store().limit("token:abc").await?, Some(Limit::new(4, 1)));
    assert_eq!(limiter.store().limit("ip:10.0.0.5").await?, Some(Limit::new(2, 1)));
    assert_eq!(limiter.store().limit("ip:10.0.0.99").await?, None);

    Ok(())
}

#[tokio::test]
async fn concurrent_requests_admit_exactly_the_limit() -> anyhow::Result<()> {
    let settings = Settings::from_json_str(r#"
    {
        "limiter": {
            "default": { "requests": 10, "every": 1 },
            "database": { "inMemory": true }
        }
    }
    "#)?;
    let config = Arc::new(LimitConfiguration::try_from(settings)?);
    let limiter = Arc::new(RateLimiter::new(config.clone(), Backend::connect(&config).await?));

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check_limit(&Subject::token("burst")).await })
        })
        .collect();

    let mut admitted = 0;
    let mut rejected = 0;
    for task in tasks {
        if task.await? {
            admitted += 1;
        } else {
            rejected += 1;
        }
    }
    assert_eq!((admitted, rejected), (10, 40));

    Ok(())
}

#[tokio::test]
async fn middleware_prefers_token_over_address() -> anyhow::Result<()> {
    let app = test::init_service(
        App::new()
            .wrap(RateLimit::new_default(limiter().await?))
            .route("/", web::get().to(ok))
    ).await;

    // the token allows 4 requests, the (more restrictive) address only 2
    for _ in 0..4 {
        let req = test::TestRequest::get()
            .peer_addr(addr("10.0.0.5"))
            .insert_header((DEFAULT_TOKEN_HEADER, "abc"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    let req = test::TestRequest::get()
        .peer_addr(addr("10.0.0.5"))
        .insert_header((DEFAULT_TOKEN_HEADER, "abc"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::TOO_MANY_REQUESTS);

    // the address quota is untouched by token traffic
    for _ in 0..2 {
        let req = test::TestRequest::get().peer_addr(addr("10.0.0.5")).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
    let req = test::TestRequest::get().peer_addr(addr("10.0.0.5")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::TOO_MANY_REQUESTS);

    Ok(())
}

#[cfg(feature = "metrics")]
#[tokio::test]
async fn middleware_outcomes_are_counted() -> anyhow::Result<()> {
    use actix_quota::Outcome;
    use actix_quota::metrics::Metrics;

    let config = Arc::new(LimitConfiguration::try_from(Settings::from_json_str(CONFIG)?)?);
    let store = Backend::connect(&config).await?;
    let metrics = Metrics::new()?;
    let limiter = Arc::new(RateLimiter::new(config, store).with_metrics(metrics.clone()));

    let app = test::init_service(
        App::new()
            .wrap(RateLimit::new_default(limiter))
            .route("/", web::get().to(ok))
    ).await;

    for _ in 0..3 {
        let req = test::TestRequest::get().peer_addr(addr("10.0.0.5")).to_request();
        test::call_service(&app, req).await;
    }

    assert_eq!(metrics.count(Outcome::Admitted), 2);
    assert_eq!(metrics.count(Outcome::Rejected), 1);
    assert_eq!(metrics.count(Outcome::StorageFault), 0);
    assert!(metrics.encode()?.contains(r#"quota_decisions_total{outcome="admitted"} 2"#));

    Ok(())
}
