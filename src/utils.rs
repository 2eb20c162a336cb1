use actix_web::{HttpMessage, HttpRequest};
use crate::limiter::Decision;
use crate::subject::Subject;

/// [RateLimitPassed] is stored in the request extensions once the
/// request has been admitted. Handlers can read who the request was
/// attributed to, and nested middlewares skip requests already counted.
#[derive(Debug, Clone)]
pub struct RateLimitPassed {
    pub(crate) subject: Subject,
    pub(crate) decision: Decision,
}

impl RateLimitPassed {
    pub(crate) fn checked(req: &HttpRequest) -> bool {
        req.extensions().get::<RateLimitPassed>().is_some()
    }

    pub(crate) fn check(req: &HttpRequest, subject: Subject, decision: Decision) {
        let passed = RateLimitPassed { subject, decision };
        req.extensions_mut().insert(passed);
    }

    /// Returns the marker of an admitted request.
    pub fn of(req: &HttpRequest) -> Option<Self> {
        req.extensions().get::<RateLimitPassed>().cloned()
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }
}
