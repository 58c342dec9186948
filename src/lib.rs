pub mod block;
pub mod config;
pub mod cookie;
pub mod dict;
pub mod error;
pub mod handler;
pub mod http;
pub mod lexer;
pub mod listen_point;
pub mod multipart;
pub mod poller;
pub mod prelude;
pub mod router;
pub mod server;
pub mod sessions;
pub mod websocket;

pub use error::Result;
