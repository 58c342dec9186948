//! URL dispatch tree. A `UrlRouter` holds an ordered list of patterns —
//! each either a literal path prefix or a regular expression — paired
//! with a handler. The first pattern that matches `request.path` wins;
//! `UrlRouter` itself implements `Handler`, so a subtree added via
//! `add_url` composes exactly like a leaf handler added via `add`.
//!
//! Grounded on `examples/original_source/src/onion/url.c`
//! (`onion_url_add_handler`/`onion_url_handler`'s "advance `path` by the
//! matched length and recurse into the next handler" dispatch, and the
//! POSIX-ERE-capture-to-numeric-GET-key convention) with the match engine
//! swapped for `regex` — the crate the rest of this pack reaches for
//! whenever it needs more than a literal comparison.

use regex::Regex;

use crate::error::ConnectionStatus;
use crate::handler::Handler;
use crate::http::{HttpRequest, HttpResponse};

enum Pattern {
    /// A pattern not starting with `^` is matched as a literal prefix,
    /// per the convention recorded in DESIGN.md's Open Question
    /// decisions — most routes are plain paths and forcing every one of
    /// them through a regex engine would be wasted cycles.
    Literal(String),
    Regex(Regex),
}

struct Route {
    pattern: Pattern,
    handler: Box<dyn Handler>,
}

/// Tried-in-order URL dispatch tree. Nests inside a `HandlerChain` and
/// nests other `UrlRouter`s inside itself identically, since both are
/// just `Handler` implementations.
#[derive(Default)]
pub struct UrlRouter {
    routes: Vec<Route>,
}

impl UrlRouter {
    pub fn new() -> Self {
        UrlRouter { routes: Vec::new() }
    }

    /// Registers a pattern against any `Handler` — a plain function, a
    /// closure, a `HandlerChain`, or another `UrlRouter`.
    pub fn add(&mut self, pattern: &str, handler: impl Handler + 'static) -> &mut Self {
        self.routes.push(Route {
            pattern: compile_pattern(pattern),
            handler: Box::new(handler),
        });
        self
    }

    /// Mounts a subtree under `pattern` — sugar for `add` where the
    /// handler happens to be another router, kept as its own method
    /// since that is the common case callers reach for when composing a
    /// tree by hand.
    pub fn add_url(&mut self, pattern: &str, subtree: UrlRouter) -> &mut Self {
        self.add(pattern, subtree)
    }

    /// Registers a fixed response body for `pattern` — used for
    /// maintenance pages, redirposted stubs, and similar fire-and-forget
    /// routes that don't warrant a full handler closure.
    pub fn add_static(&mut self, pattern: &str, body: impl Into<Vec<u8>>, code: u16) -> &mut Self {
        let body = body.into();
        self.add(pattern, move |_req: &mut HttpRequest, res: &mut HttpResponse| {
            res.set_status_code(code);
            res.set_body(body.clone(), "text/plain");
            ConnectionStatus::Processed
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Handler for UrlRouter {
    fn call(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
        for route in &self.routes {
            match &route.pattern {
                Pattern::Literal(lit) => {
                    if let Some(rest) = req.path.strip_prefix(lit.as_str()) {
                        let rest = rest.to_string();
                        let saved = std::mem::replace(&mut req.path, rest);
                        let status = route.handler.call(req, res);
                        if status != ConnectionStatus::NotProcessed {
                            return status;
                        }
                        req.path = saved;
                    }
                }
                Pattern::Regex(re) => {
                    let Some(caps) = re.captures(&req.path.clone()) else {
                        continue;
                    };
                    let whole = caps.get(0).unwrap();
                    if whole.start() != 0 {
                        continue;
                    }
                    for i in 1..=15 {
                        match caps.get(i) {
                            Some(m) => req.get_params.add(i.to_string(), m.as_str(), true),
                            None => break,
                        }
                    }
                    let matched_len = whole.end();
                    let saved = req.path.clone();
                    let remainder = req.path[matched_len..].to_string();
                    req.path = remainder;
                    let status = route.handler.call(req, res);
                    if status != ConnectionStatus::NotProcessed {
                        return status;
                    }
                    req.path = saved;
                }
            }
        }
        ConnectionStatus::NotProcessed
    }
}

fn compile_pattern(pattern: &str) -> Pattern {
    if let Some(regex_src) = pattern.strip_prefix('^') {
        match Regex::new(&format!("^{regex_src}")) {
            Ok(re) => Pattern::Regex(re),
            Err(_) => Pattern::Literal(pattern.to_string()),
        }
    } else {
        Pattern::Literal(pattern.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler(_req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
        res.set_status_code(200);
        ConnectionStatus::Processed
    }

    fn make_request(path: &str) -> HttpRequest {
        let mut req = HttpRequest::new();
        let raw = format!("GET {path} HTTP/1.1\r\n\r\n");
        req.feed(raw.as_bytes(), &crate::http::RequestLimits::default()).unwrap();
        req
    }

    #[test]
    fn literal_pattern_matches_exact_prefix() {
        let mut router = UrlRouter::new();
        router.add("/hello", ok_handler);
        let mut req = make_request("/hello");
        let mut res = HttpResponse::ok();
        assert_eq!(router.call(&mut req, &mut res), ConnectionStatus::Processed);
    }

    #[test]
    fn literal_pattern_advances_path_for_subtree() {
        let mut inner = UrlRouter::new();
        inner.add("/world", ok_handler);
        let mut outer = UrlRouter::new();
        outer.add_url("/hello", inner);

        let mut req = make_request("/hello/world");
        let mut res = HttpResponse::ok();
        assert_eq!(outer.call(&mut req, &mut res), ConnectionStatus::Processed);
    }

    #[test]
    fn no_match_reports_not_processed() {
        let mut router = UrlRouter::new();
        router.add("/hello", ok_handler);
        let mut req = make_request("/other");
        let mut res = HttpResponse::ok();
        assert_eq!(router.call(&mut req, &mut res), ConnectionStatus::NotProcessed);
    }

    #[test]
    fn regex_pattern_populates_numeric_get_params() {
        let mut router = UrlRouter::new();
        router.add(r"^/user/(\d+)/(\w+)", ok_handler);
        let mut req = make_request("/user/42/profile");
        let mut res = HttpResponse::ok();
        assert_eq!(router.call(&mut req, &mut res), ConnectionStatus::Processed);
        assert_eq!(req.get_params.get("1").as_deref(), Some("42"));
        assert_eq!(req.get_params.get("2").as_deref(), Some("profile"));
    }

    #[test]
    fn add_static_serves_a_fixed_body() {
        let mut router = UrlRouter::new();
        router.add_static("/maintenance", b"down for maintenance".to_vec(), 503);
        let mut req = make_request("/maintenance");
        let mut res = HttpResponse::ok();
        router.call(&mut req, &mut res);
        assert_eq!(res.status_code, 503);
        assert_eq!(res.body, b"down for maintenance");
    }

    #[test]
    fn first_match_wins() {
        let mut router = UrlRouter::new();
        router.add("/a", |_: &mut HttpRequest, res: &mut HttpResponse| {
            res.set_status_code(201);
            ConnectionStatus::Processed
        });
        router.add("/a", ok_handler);
        let mut req = make_request("/a");
        let mut res = HttpResponse::ok();
        router.call(&mut req, &mut res);
        assert_eq!(res.status_code, 201);
    }
}
