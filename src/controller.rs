use actix_web::{HttpRequest, HttpResponse, HttpResponseBuilder};
use actix_web::http::StatusCode;
use crate::limiter::Decision;
use crate::subject::Subject;

pub(crate) type FromRequestFunc<I> = Box<dyn Fn(&HttpRequest) -> I + 'static>;

pub(crate) type OnDecisionFunc<R> = Box<dyn Fn(&HttpRequest, &Subject, &Decision) -> R + 'static>;

/// Header carrying the API credential, checked before the peer address.
pub const DEFAULT_TOKEN_HEADER: &str = "API_KEY";

pub const DEFAULT_RATE_LIMITED_UNTIL_HEADER: &str = "X-Rate-Limited-Until";

/// Subject key used when the peer address is not known.
pub const UNKNOWN_SOURCE: &str = "<Unknown Source IP>";

/// [Controller] is a set of functions deciding how the middleware
/// treats a request: whether it is checked at all, who it is
/// attributed to, and what is answered when it is rejected.
pub struct Controller {
    pub(crate) fn_do_rate_limit: Option<FromRequestFunc<bool>>,
    pub(crate) fn_find_subject: Option<FromRequestFunc<Subject>>,
    pub(crate) token_header: String,
    pub(crate) fn_on_rate_limited: Option<OnDecisionFunc<HttpResponse>>,
    pub(crate) fn_on_success: Option<OnDecisionFunc<()>>,
}

impl Controller {
    /// Create a default Controller
    pub fn new() -> Self {
        Self {
            fn_do_rate_limit: None,
            fn_find_subject: None,
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            fn_on_rate_limited: None,
            fn_on_success: None,
        }
    }

    /// Requests for which `f` returns `false` pass without being counted.
    pub fn with_do_rate_limit(mut self, f: impl Fn(&HttpRequest) -> bool + 'static) -> Self {
        self.fn_do_rate_limit = Some(Box::new(f));
        self
    }

    /// Replaces the default subject resolution (token header, then peer address).
    pub fn with_find_subject(mut self, f: impl Fn(&HttpRequest) -> Subject + 'static) -> Self {
        self.fn_find_subject = Some(Box::new(f));
        self
    }

    /// Header the default subject resolution reads the token from.
    pub fn with_token_header<T: ToString>(mut self, header: T) -> Self {
        self.token_header = header.to_string();
        self
    }

    pub fn on_rate_limited(
        mut self,
        f: impl Fn(&HttpRequest, &Subject, &Decision) -> HttpResponse + 'static,
    ) -> Self {
        self.fn_on_rate_limited = Some(Box::new(f));
        self
    }

    /// Called for every admitted request, before the next handler runs.
    pub fn on_success(mut self, f: impl Fn(&HttpRequest, &Subject, &Decision) + 'static) -> Self {
        self.fn_on_success = Some(Box::new(f));
        self
    }

    pub(crate) fn do_rate_limit(&self, req: &HttpRequest) -> bool {
        match &self.fn_do_rate_limit {
            Some(f) => f(req),
            None => true,
        }
    }

    pub(crate) fn find_subject(&self, req: &HttpRequest) -> Subject {
        match &self.fn_find_subject {
            Some(f) => f(req),
            None => default_find_subject(req, &self.token_header),
        }
    }

    pub(crate) fn rate_limited(&self, req: &HttpRequest, subject: &Subject, decision: &Decision) -> HttpResponse {
        match &self.fn_on_rate_limited {
            Some(f) => f(req, subject, decision),
            None => default_on_rate_limited(req, subject, decision),
        }
    }

    pub(crate) fn success(&self, req: &HttpRequest, subject: &Subject, decision: &Decision) {
        if let Some(f) = &self.fn_on_success {
            f(req, subject, decision)
        }
    }
}

impl Default for Controller {
    /// alias of [Self::new]
    fn default() -> Self {
        Self::new()
    }
}

/// A non-empty token header wins over the peer address.
pub fn default_find_subject(req: &HttpRequest, token_header: &str) -> Subject {
    let token = req.headers()
        .get(token_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = token {
        return Subject::token(token);
    }

    let address = req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
    Subject::address(address)
}

pub fn default_on_rate_limited(_: &HttpRequest, _: &Subject, decision: &Decision) -> HttpResponse {
    let mut builder = HttpResponseBuilder::new(StatusCode::TOO_MANY_REQUESTS);

    if let Some(until) = decision.reset_at {
        builder.insert_header((DEFAULT_RATE_LIMITED_UNTIL_HEADER, until.timestamp().to_string()));
    }

    builder.finish()
}
