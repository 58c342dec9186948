//! Convenience re-exports for host programs embedding this crate and for
//! `src/bin/main.rs`. Mirrors the teacher's habit of a single `prelude`
//! module instead of asking every caller to spell out `crate::config::...`.

pub use crate::config::{AppConfig, RouteConfig, ServerConfig};
pub use crate::cookie::{Cookies, SetCookie};
pub use crate::dict::{Dict, DictValue};
pub use crate::error::{CleanError, ConnectionStatus, Result};
pub use crate::handler::{Handler, HandlerChain};
pub use crate::http::{HttpRequest, HttpResponse};
pub use crate::multipart::{find_subsequence, parse_part_headers, CompletedPart, PartHeaders};
pub use crate::router::UrlRouter;
pub use crate::server::Server;
pub use crate::sessions::{InMemorySessionStore, SessionStore};
pub use crate::websocket::{self, MessageHandler, Opcode};

pub use mio::{
    event::Event,
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};
pub use proxy_log::{debug, errors, info, trace, warn};

pub use std::collections::HashMap;
pub use std::io::{ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

pub const READ_BUF_SIZE: usize = 4096;
