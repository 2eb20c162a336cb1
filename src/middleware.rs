use std::rc::Rc;
use std::sync::Arc;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use crate::controller::Controller;
use crate::limiter::RateLimiter;
use crate::store::Store;
use crate::utils::RateLimitPassed;

/// [RateLimit] checks every request against a shared [RateLimiter]
/// and answers rejected ones itself, without calling the next handler.
pub struct RateLimit<T: Store> {
    inner: Rc<RateLimitInner<T>>,
}

struct RateLimitInner<T: Store> {
    pub limiter: Arc<RateLimiter<T>>,
    pub controller: Controller,
}

impl<T, S, B> Transform<S, ServiceRequest> for RateLimit<T>
    where
        T: Store + 'static,
        S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
        S::Future: 'static,
        B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = S::Error;
    type Transform = RateLimitService<T, S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            inner: self.inner.clone(),
            service: Rc::new(service),
        }))
    }
}

pub struct RateLimitService<T, S>
    where T: Store,
{
    inner: Rc<RateLimitInner<T>>,
    service: Rc<S>,
}

impl<T, S, B> Service<ServiceRequest> for RateLimitService<T, S>
    where
        T: Store + 'static,
        S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
        S::Future: 'static,
        B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = S::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, svc: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            let req = svc.request();
            if !inner.controller.do_rate_limit(req) || RateLimitPassed::checked(req) {
                let res = service.call(svc).await?.map_into_left_body();
                return Ok(res);
            }

            let subject = inner.controller.find_subject(req);
            let decision = inner.limiter.check(&subject).await;

            if !decision.admitted {
                let body = inner.controller.rate_limited(req, &subject, &decision);
                return Ok(svc.into_response(body).map_into_right_body());
            }

            inner.controller.success(req, &subject, &decision);
            RateLimitPassed::check(req, subject, decision);

            let res = service.call(svc).await?.map_into_left_body();
            Ok(res)
        })
    }
}

impl<T: Store> RateLimit<T> {
    /// create a new [RateLimit] middleware, with a custom [Controller].
    pub fn new(limiter: Arc<RateLimiter<T>>, controller: Controller) -> Self {
        Self {
            inner: Rc::new(RateLimitInner {
                limiter,
                controller,
            }),
        }
    }

    /// create a new [RateLimit] middleware with the default [Controller].
    pub fn new_default(limiter: Arc<RateLimiter<T>>) -> Self {
        Self::new(limiter, Controller::default())
    }
}
