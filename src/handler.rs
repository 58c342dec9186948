//! The handler composition tree: an ordered chain of handlers tried in
//! turn, first non-`NotProcessed` result wins. `UrlRouter` (see
//! `router.rs`) is itself just a `Handler`, so routers nest inside chains
//! and chains nest inside routers identically — the original library's
//! "handler is a node in a tree" design, expressed as a trait object
//! instead of a tagged union with a function pointer.

use crate::error::ConnectionStatus;
use crate::http::{HttpRequest, HttpResponse};

pub trait Handler: Send + Sync {
    fn call(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus;
}

impl<F> Handler for F
where
    F: Fn(&mut HttpRequest, &mut HttpResponse) -> ConnectionStatus + Send + Sync,
{
    fn call(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
        self(req, res)
    }
}

/// An ordered list of handlers. `call` tries each in turn and stops at the
/// first one that returns something other than `NotProcessed`. If every
/// handler declines, the chain itself reports `NotProcessed` so a caller
/// further up (e.g. the server's own fallback) can turn that into a 404.
pub struct HandlerChain {
    handlers: Vec<Box<dyn Handler>>,
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerChain {
    pub fn new() -> Self {
        HandlerChain { handlers: Vec::new() }
    }

    pub fn push(&mut self, handler: Box<dyn Handler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Handler for HandlerChain {
    fn call(&self, req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
        for handler in &self.handlers {
            let status = handler.call(req, res);
            if status != ConnectionStatus::NotProcessed {
                return status;
            }
        }
        ConnectionStatus::NotProcessed
    }
}

/// Wraps a chain (or any handler) with a last-resort fallback that turns a
/// fully-unprocessed request into an internal error response instead of
/// leaving the caller with an empty body.
pub fn internal_error_fallback(res: &mut HttpResponse) -> ConnectionStatus {
    res.set_status_code(500);
    res.set_body(b"Internal Server Error".to_vec(), "text/plain");
    ConnectionStatus::Processed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_processed(_: &mut HttpRequest, _: &mut HttpResponse) -> ConnectionStatus {
        ConnectionStatus::NotProcessed
    }

    fn processed(_: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
        res.set_status_code(200);
        ConnectionStatus::Processed
    }

    #[test]
    fn chain_tries_handlers_in_order_and_stops_at_first_match() {
        let mut chain = HandlerChain::new();
        chain.push(Box::new(not_processed));
        chain.push(Box::new(processed));

        let mut req = HttpRequest::new();
        let mut res = HttpResponse::new(200, "OK");
        let status = chain.call(&mut req, &mut res);
        assert_eq!(status, ConnectionStatus::Processed);
        assert_eq!(res.status_code, 200);
    }

    #[test]
    fn empty_chain_reports_not_processed() {
        let chain = HandlerChain::new();
        let mut req = HttpRequest::new();
        let mut res = HttpResponse::new(200, "OK");
        assert_eq!(chain.call(&mut req, &mut res), ConnectionStatus::NotProcessed);
    }
}
