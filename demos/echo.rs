//! Minimal embedding example: a single route that echoes the request body
//! back as the response body, plus a catch-all that reports the method and
//! path it was asked for. Exists so `tests/` (and a reader skimming the
//! crate) has a concrete, runnable host program to point at.

use std::sync::Arc;

use hearth_http::config::ServerConfig;
use hearth_http::error::ConnectionStatus;
use hearth_http::http::{HttpRequest, HttpResponse};
use hearth_http::router::UrlRouter;
use hearth_http::server::Server;

fn echo(req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
    let content_type = req
        .headers
        .get("content-type")
        .unwrap_or_else(|| "application/octet-stream".to_string());
    res.set_body(req.body.clone(), &content_type);
    ConnectionStatus::Processed
}

fn not_found(req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
    res.set_status_code(404);
    res.set_body(
        format!("no route for {} {}", req.method, req.path).into_bytes(),
        "text/plain",
    );
    ConnectionStatus::Processed
}

fn main() -> hearth_http::Result<()> {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.ports = vec![7878];
    config.server_name = "echo-demo".to_string();

    let mut router = UrlRouter::new();
    router.add("/echo", echo);
    router.add("^/.*", not_found);

    let mut server = Server::new(vec![config], Arc::new(router))?;
    println!("echo demo listening on {:?}", server.local_addrs());
    server.run()
}
