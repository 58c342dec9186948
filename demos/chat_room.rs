//! A broadcast-free WebSocket demo: every connected client gets an echo of
//! whatever text frame it sends, wrapped with a prefix, so the round trip
//! through the upgrade handshake and frame loop can be exercised by hand
//! with any WebSocket client. A real chat room would fan a message out to
//! every other open connection; this demo stays single-connection to avoid
//! needing a shared registry of sockets, which is host-program territory,
//! not something this library's `Handler` contract gives a route access to.

use std::sync::Arc;

use hearth_http::config::ServerConfig;
use hearth_http::error::ConnectionStatus;
use hearth_http::http::{HttpRequest, HttpResponse};
use hearth_http::router::UrlRouter;
use hearth_http::server::Server;
use hearth_http::websocket::Opcode;

fn chat(_req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
    res.set_websocket_handler(Arc::new(|payload: &[u8], opcode: Opcode| match opcode {
        Opcode::Text => {
            let mut reply = b"you said: ".to_vec();
            reply.extend_from_slice(payload);
            Some(reply)
        }
        _ => None,
    }));
    ConnectionStatus::WebSocket
}

fn main() -> hearth_http::Result<()> {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.ports = vec![7879];
    config.server_name = "chat-room-demo".to_string();

    let mut router = UrlRouter::new();
    router.add("/chat", chat);

    let mut server = Server::new(vec![config], Arc::new(router))?;
    println!("chat room demo listening on {:?}", server.local_addrs());
    server.run()
}
