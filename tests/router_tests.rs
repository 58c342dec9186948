use hearth_http::error::ConnectionStatus;
use hearth_http::handler::{Handler, HandlerChain};
use hearth_http::http::{HttpRequest, HttpResponse, Method, RequestLimits};
use hearth_http::router::UrlRouter;

fn respond_with(body: &'static str) -> impl Fn(&mut HttpRequest, &mut HttpResponse) -> ConnectionStatus {
    move |_req, res| {
        res.set_body(body.as_bytes().to_vec(), "text/plain");
        ConnectionStatus::Processed
    }
}

fn request_for(raw_path: &str) -> HttpRequest {
    let mut req = HttpRequest::new();
    let limits = RequestLimits::default();
    let raw = format!("GET {raw_path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    req.feed(raw.as_bytes(), &limits).unwrap();
    req
}

#[test]
fn literal_prefix_match_wins_before_regex_fallback() {
    let mut router = UrlRouter::new();
    router.add("/health", respond_with("ok"));
    router.add("^/.*", respond_with("fallback"));

    let mut req = request_for("/health");
    let mut res = HttpResponse::ok();
    router.call(&mut req, &mut res);
    assert_eq!(res.body, b"ok");
}

#[test]
fn first_registered_match_wins_over_a_later_more_specific_one() {
    let mut router = UrlRouter::new();
    router.add("/a", respond_with("first"));
    router.add("/a/b", respond_with("second"));

    let mut req = request_for("/a/b");
    let mut res = HttpResponse::ok();
    router.call(&mut req, &mut res);
    assert_eq!(res.body, b"first");
}

#[test]
fn no_match_reports_not_processed() {
    let mut router = UrlRouter::new();
    router.add("/a", respond_with("first"));

    let mut req = request_for("/b");
    let mut res = HttpResponse::ok();
    let status = router.call(&mut req, &mut res);
    assert_eq!(status, ConnectionStatus::NotProcessed);
}

#[test]
fn regex_captures_populate_numeric_get_keys() {
    let mut router = UrlRouter::new();
    router.add(r"^/users/(\d+)$", |req: &mut HttpRequest, res: &mut HttpResponse| {
        let id = req.get_params.get("1").unwrap_or_default();
        res.set_body(format!("user {id}").into_bytes(), "text/plain");
        ConnectionStatus::Processed
    });

    let mut req = request_for("/users/42");
    let mut res = HttpResponse::ok();
    router.call(&mut req, &mut res);
    assert_eq!(res.body, b"user 42");
}

#[test]
fn nested_router_mounted_via_add_url_composes_like_a_leaf_handler() {
    let mut api = UrlRouter::new();
    api.add("/ping", respond_with("pong"));

    let mut root = UrlRouter::new();
    root.add_url("/api", api);

    let mut req = request_for("/api/ping");
    let mut res = HttpResponse::ok();
    root.call(&mut req, &mut res);
    assert_eq!(res.body, b"pong");
}

#[test]
fn handler_chain_falls_through_to_second_handler_when_first_does_not_process() {
    let mut chain = HandlerChain::new();
    chain.push(Box::new(|req: &mut HttpRequest, res: &mut HttpResponse| {
        if req.url == "/only-this-one" {
            res.set_body(b"matched".to_vec(), "text/plain");
            ConnectionStatus::Processed
        } else {
            ConnectionStatus::NotProcessed
        }
    }));
    chain.push(Box::new(respond_with("second handler")));

    let mut req = request_for("/elsewhere");
    let mut res = HttpResponse::ok();
    chain.call(&mut req, &mut res);
    assert_eq!(res.body, b"second handler");
}
