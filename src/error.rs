use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

use crate::config::ConfigError;

/// Wraps any boundary error (I/O, address parsing, config loading) with a
/// terse, colorized `Display` suitable for printing straight to a terminal.
pub struct CleanError(pub Box<dyn Error>);

impl Debug for CleanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for CleanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for CleanError {}

impl From<ConfigError> for CleanError {
    fn from(e: ConfigError) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::io::Error> for CleanError {
    fn from(e: std::io::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for CleanError {
    fn from(e: std::net::AddrParseError) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<String> for CleanError {
    fn from(s: String) -> Self {
        CleanError(Box::new(StringError(s)))
    }
}

impl From<&str> for CleanError {
    fn from(s: &str) -> Self {
        CleanError(Box::new(StringError(s.to_string())))
    }
}

#[derive(Debug)]
struct StringError(String);

impl Display for StringError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for StringError {}

pub type Result<T> = std::result::Result<T, CleanError>;

/// Status threaded through the parser/handler/connection pipeline. This
/// replaces the integer return codes the wire protocol was originally
/// modeled with: every stage of request handling returns one of these
/// instead of poking at a raw `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The handler declined to deal with this request; try the next one
    /// in the chain.
    NotProcessed,
    /// The handler fully wrote a response.
    Processed,
    /// The parser needs more bytes from the socket before it can make
    /// progress; not an error.
    NeedMoreData,
    /// The response was sent and the connection stays open for another
    /// request.
    KeepAlive,
    /// The response was sent (or could not be) and the socket must be
    /// closed.
    CloseConnection,
    /// The connection was upgraded to a WebSocket stream.
    WebSocket,
    /// The handler wants to be polled again before it is considered
    /// complete (used by streaming handlers).
    Yield,
    /// Something went wrong constructing the response; the caller should
    /// fall back to a generic 500.
    InternalError,
    /// The request method/feature is recognized but not supported.
    NotImplemented,
    /// The request is well-formed but not permitted.
    Forbidden,
}

impl ConnectionStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ConnectionStatus::InternalError
                | ConnectionStatus::NotImplemented
                | ConnectionStatus::Forbidden
        )
    }

    pub fn closes_connection(self) -> bool {
        matches!(self, ConnectionStatus::CloseConnection | ConnectionStatus::InternalError)
    }
}
