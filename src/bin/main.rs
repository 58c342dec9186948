use std::sync::Arc;

use hearth_http::config::{AppConfig, FromYaml};
use hearth_http::error::Result;
use hearth_http::handler::Handler;
use hearth_http::http::{HttpRequest, HttpResponse};
use hearth_http::error::ConnectionStatus;
use hearth_http::router::UrlRouter;
use hearth_http::server::Server;

fn main() -> Result<()> {
    let content = std::fs::read_to_string("config.yaml")?;
    let config = AppConfig::from_str(&content)?;
    config.display_config();

    let mut router = UrlRouter::new();
    router.add("/api", handle_api);
    router.add("^/.*", handle_index);

    let mut server = Server::new(config.servers, Arc::new(router))?;
    server.run()
}

fn handle_index(_req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
    res.set_body(b"<h1>Welcome to Home</h1>".to_vec(), "text/html");
    ConnectionStatus::Processed
}

fn handle_api(_req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
    res.set_header("access-control-allow-origin", "*");
    res.set_body(b"{\"status\": \"active\"}".to_vec(), "application/json");
    ConnectionStatus::Processed
}
