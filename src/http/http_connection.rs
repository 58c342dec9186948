//! Per-connection state machine: owns the transport, the in-flight
//! request parser, the outgoing write buffer, and (once upgraded) the
//! WebSocket frame loop. One `Connection` exists per accepted socket;
//! the worker event loop in `server.rs` owns a `HashMap<Token,
//! Connection>` and calls `drive` whenever the poller reports that
//! token ready.
//!
//! Grounded on the teacher's `HttpConnection` (the read-phase/write-
//! phase split, the write buffer drained by `write_data`, pipelining via
//! re-entering the parser once a response flushes) with the CGI/upload
//! fields replaced by the session + WebSocket plumbing `SPEC_FULL.md`
//! §4.8/§4.9 call for.

use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cookie::{Cookies, SetCookie};
use crate::error::ConnectionStatus;
use crate::handler::Handler;
use crate::http::request::{FeedOutcome, ParseError, RequestLimits};
use crate::http::response::error_response;
use crate::http::{HttpRequest, HttpResponse};
use crate::listen_point::Transport;
use crate::sessions::{generate_session_id, SessionStore};
use crate::websocket::{self, Frame, MessageHandler, Opcode};

pub const READ_BUF_SIZE: usize = 4096;

/// What the worker loop should do with a connection's poller
/// registration after `drive` returns.
#[derive(Debug, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Stay registered; more reading and/or writing may still happen.
    Continue,
    /// The transport is done; deregister and drop the connection.
    Close,
}

enum Mode {
    Http,
    WebSocket {
        handler: Arc<MessageHandler>,
        inbound: Vec<u8>,
    },
}

/// A message handler installed by a WebSocket route — invoked once per
/// complete text/binary frame, returning bytes to write back (if any).
/// This is the callback half of spec's blocking/callback WebSocket
/// model; a handler that wants the blocking variant simply never
/// installs one and instead drains frames itself between `drive` calls
/// (see DESIGN.md's Open Question decision on this simplification).
fn noop_handler(_payload: &[u8], _op: Opcode) -> Option<Vec<u8>> {
    None
}

pub struct Connection {
    pub transport: Transport,
    pub peer: SocketAddr,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    request: HttpRequest,
    limits: RequestLimits,
    handler: Arc<dyn Handler>,
    session_store: Arc<dyn SessionStore>,
    mode: Mode,
    handshake_done: bool,
    closing: bool,
}

impl Connection {
    pub fn new(
        transport: Transport,
        peer: SocketAddr,
        limits: RequestLimits,
        handler: Arc<dyn Handler>,
        session_store: Arc<dyn SessionStore>,
    ) -> Self {
        Connection {
            transport,
            peer,
            read_buf: vec![0u8; READ_BUF_SIZE],
            write_buf: Vec::new(),
            request: HttpRequest::new(),
            limits,
            handler,
            session_store,
            mode: Mode::Http,
            handshake_done: false,
            closing: false,
        }
    }

    pub fn wants_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Drives the connection forward in response to a readiness event.
    /// Returns what the worker loop should do with the poller
    /// registration afterward.
    pub fn drive(&mut self, readable: bool, writable: bool) -> DriveOutcome {
        if !self.handshake_done {
            match self.transport.advance_handshake() {
                Ok(true) => self.handshake_done = true,
                Ok(false) => return DriveOutcome::Continue,
                Err(_) => return DriveOutcome::Close,
            }
        }

        if readable {
            match self.read_available() {
                Ok(eof) => {
                    if eof {
                        self.closing = true;
                    }
                }
                Err(_) => return DriveOutcome::Close,
            }
        }

        if writable || self.wants_write() {
            if self.flush_write_buf().is_err() {
                return DriveOutcome::Close;
            }
        }

        if self.closing && self.write_buf.is_empty() {
            return DriveOutcome::Close;
        }

        DriveOutcome::Continue
    }

    fn read_available(&mut self) -> std::io::Result<bool> {
        loop {
            match self.transport.read(&mut self.read_buf) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    let chunk = self.read_buf[..n].to_vec();
                    self.on_bytes(&chunk);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn on_bytes(&mut self, chunk: &[u8]) {
        match &mut self.mode {
            Mode::Http => self.feed_http(chunk),
            Mode::WebSocket { .. } => self.feed_websocket(chunk),
        }
    }

    fn feed_http(&mut self, chunk: &[u8]) {
        let mut pending: &[u8] = chunk;
        loop {
            match self.request.feed(pending, &self.limits) {
                Ok(FeedOutcome::NeedMoreData) => return,
                Ok(FeedOutcome::Complete) => {
                    self.dispatch_one();
                    let pipelined = self.request.has_pipelined_data();
                    self.request.reset_for_next_request();
                    if matches!(self.mode, Mode::WebSocket { .. }) || !pipelined {
                        return;
                    }
                    // A second request was already sitting in the
                    // buffer behind the first (pipelining); re-enter the
                    // parser with no new bytes instead of waiting for
                    // another readiness event that may never come.
                    pending = &[];
                }
                Err(e) => {
                    self.write_error(&e);
                    self.closing = true;
                    return;
                }
            }
        }
    }

    fn dispatch_one(&mut self) {
        self.load_session();

        let mut res = HttpResponse::ok();
        let status = self.handler.call(&mut self.request, &mut res);

        if status == ConnectionStatus::WebSocket {
            self.upgrade_to_websocket(res);
            return;
        }
        if let Some(fallback) = fallback_response_for(status) {
            res = fallback;
        }

        self.persist_session(&mut res);

        let keep_alive = !status.closes_connection()
            && self
                .request
                .headers
                .get("connection")
                .map(|v| !v.eq_ignore_ascii_case("close"))
                .unwrap_or(true);

        res.set_header("connection", if keep_alive { "keep-alive" } else { "close" });
        if !keep_alive {
            self.closing = true;
        }

        self.write_buf.extend_from_slice(&res.to_bytes());
    }

    fn load_session(&mut self) {
        let cookie_header = self.request.headers.get("cookie").unwrap_or_default();
        let cookies = Cookies::parse(&cookie_header);
        let candidate = cookies.get("sessionid").cloned();

        if let Some(id) = candidate {
            if let Some(dict) = self.session_store.get(&id) {
                self.request.session = dict;
                self.request.session_id = Some(id);
                return;
            }
        }

        self.request.session_id = Some(generate_session_id());
    }

    fn persist_session(&mut self, res: &mut HttpResponse) {
        if self.request.session.count() == 0 {
            return;
        }
        let Some(id) = self.request.session_id.clone() else {
            return;
        };
        self.session_store.save(&id, Some(self.request.session.hard_dup()));
        res.add_cookie(SetCookie::new("sessionid", &id).http_only(true).path("/"));
    }

    fn write_error(&mut self, err: &ParseError) {
        let res = error_response(err.status_code());
        self.write_buf.extend_from_slice(&res.to_bytes());
    }

    /// Completes (or rejects) a handler's request to upgrade this
    /// connection to a WebSocket stream. The handler already ran and
    /// returned `ConnectionStatus::WebSocket`, optionally stashing a
    /// frame callback on `res` via `HttpResponse::set_websocket_handler`
    /// — but the handshake itself (the `Sec-WebSocket-Accept` value) is
    /// computed here, against the original request headers, rather than
    /// trusted to the handler: a route should only have to decide *that*
    /// it wants a WebSocket, not recompute RFC 6455's hash by hand.
    fn upgrade_to_websocket(&mut self, res: HttpResponse) {
        match websocket::negotiate(&self.request.headers, &[]) {
            Ok((accept, protocol)) => {
                let mut negotiated = HttpResponse::new(101, "Switching Protocols");
                negotiated.headers.set("connection", "upgrade");
                negotiated.headers.set("upgrade", "websocket");
                negotiated.headers.set("sec-websocket-accept", accept.as_str());
                if let Some(protocol) = protocol {
                    negotiated.headers.set("sec-websocket-protocol", protocol.as_str());
                }
                self.write_buf.extend_from_slice(&negotiated.to_bytes_headers_only());
                self.mode = Mode::WebSocket {
                    handler: res.websocket_handler.unwrap_or_else(|| Arc::new(noop_handler)),
                    inbound: Vec::new(),
                };
            }
            Err(e) => {
                let mut rejection = error_response(400);
                rejection.set_body(format!("websocket handshake rejected: {e}").into_bytes(), "text/plain");
                self.write_buf.extend_from_slice(&rejection.to_bytes());
                self.closing = true;
            }
        }
    }

    fn feed_websocket(&mut self, chunk: &[u8]) {
        let Mode::WebSocket { handler, inbound } = &mut self.mode else {
            return;
        };
        inbound.extend_from_slice(chunk);

        loop {
            match websocket::read_frame(inbound) {
                Ok((frame, consumed)) => {
                    inbound.drain(..consumed);
                    match handle_frame(frame, handler) {
                        FrameAction::Reply(bytes) => self.write_buf.extend_from_slice(&bytes),
                        FrameAction::Close(bytes) => {
                            self.write_buf.extend_from_slice(&bytes);
                            self.closing = true;
                            return;
                        }
                        FrameAction::None => {}
                    }
                }
                Err(websocket::FrameError::NeedMoreData) => return,
                Err(_) => {
                    self.closing = true;
                    return;
                }
            }
        }
    }

    fn flush_write_buf(&mut self) -> std::io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.transport.write(&self.write_buf) {
                Ok(0) => return Err(std::io::Error::new(ErrorKind::WriteZero, "write returned 0")),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        let _ = self.transport.flush();
        Ok(())
    }
}

/// Maps a `Handler`'s returned status to the canned response it should
/// produce instead of whatever the handler left behind, per the status
/// table: `NotProcessed`→404, `Forbidden`→403, `NotImplemented`→501,
/// `InternalError`→500. Returns `None` for every other status, meaning
/// the handler's own response stands as-is.
fn fallback_response_for(status: ConnectionStatus) -> Option<HttpResponse> {
    match status {
        ConnectionStatus::NotProcessed => Some(error_response(404)),
        ConnectionStatus::Forbidden => Some(error_response(403)),
        ConnectionStatus::NotImplemented => Some(error_response(501)),
        ConnectionStatus::InternalError => Some(error_response(500)),
        _ => None,
    }
}

enum FrameAction {
    None,
    Reply(Vec<u8>),
    Close(Vec<u8>),
}

fn handle_frame(frame: Frame, handler: &Arc<MessageHandler>) -> FrameAction {
    match frame.opcode {
        Opcode::Ping => FrameAction::Reply(websocket::write_pong(&frame.payload)),
        Opcode::Pong => FrameAction::None,
        Opcode::Close => FrameAction::Close(websocket::write_close(1000, "")),
        Opcode::Text | Opcode::Binary => match handler(&frame.payload, frame.opcode) {
            Some(reply) => FrameAction::Reply(websocket::write_frame(frame.opcode, &reply)),
            None => FrameAction::None,
        },
        Opcode::Continuation => FrameAction::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionStatus;

    fn ok_handler(_req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
        res.set_body(b"hi".to_vec(), "text/plain");
        ConnectionStatus::Processed
    }

    #[test]
    fn drive_outcome_continue_variant_is_distinct_from_close() {
        assert_ne!(DriveOutcome::Continue, DriveOutcome::Close);
    }

    #[test]
    fn handler_is_object_safe_behind_arc() {
        let handler: Arc<dyn Handler> = Arc::new(ok_handler);
        let mut req = HttpRequest::new();
        let mut res = HttpResponse::ok();
        assert_eq!(handler.call(&mut req, &mut res), ConnectionStatus::Processed);
    }

    #[test]
    fn forbidden_status_maps_to_403_not_500() {
        let res = fallback_response_for(ConnectionStatus::Forbidden).unwrap();
        assert_eq!(res.status_code, 403);
    }

    #[test]
    fn not_implemented_status_maps_to_501_not_500() {
        let res = fallback_response_for(ConnectionStatus::NotImplemented).unwrap();
        assert_eq!(res.status_code, 501);
    }

    #[test]
    fn internal_error_status_still_maps_to_500() {
        let res = fallback_response_for(ConnectionStatus::InternalError).unwrap();
        assert_eq!(res.status_code, 500);
    }

    #[test]
    fn not_processed_status_maps_to_404() {
        let res = fallback_response_for(ConnectionStatus::NotProcessed).unwrap();
        assert_eq!(res.status_code, 404);
    }

    #[test]
    fn processed_status_leaves_handlers_response_untouched() {
        assert!(fallback_response_for(ConnectionStatus::Processed).is_none());
    }
}
