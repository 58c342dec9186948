//! The embeddable server façade: owns every listen point, the worker's
//! `Poller`, the live connection table, and the root `Handler` a host
//! program hands in. `Server::new` binds and registers sockets;
//! `Server::run` blocks the calling thread driving the event loop until
//! `stop()` is called or a shutdown signal arrives.
//!
//! Grounded on the teacher's `src/bin/main.rs` event loop (`Poll::new`,
//! `accept` on listener readiness, per-connection dispatch) generalized
//! per SPEC_FULL.md §4.1/§4.12: listen points and connections now share
//! one `Poller` instead of the teacher's single hardcoded listener, and
//! lifecycle (signal handling, clean shutdown) is pulled out of `main`
//! and in here where an embedding program can reach it.
//!
//! Concurrency model: one `Server` drives one `Poller` on the thread that
//! calls `run` — see `poller.rs`'s module comment for why a `Poller` is
//! never shared across threads. `max_threads > 1` is honored by running
//! more than one `Server` (each with its own accepted-connection slice)
//! rather than by this type spawning threads itself; that composition
//! choice is recorded in DESIGN.md.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use mio::Token;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::Handler;
use crate::http::request::RequestLimits;
use crate::http::http_connection::{Connection, DriveOutcome};
use crate::listen_point::{build_rustls_config, ListenPoint};
use crate::poller::{register_rw, PollEvent, Poller};
use crate::sessions::{InMemorySessionStore, SessionStore};

/// How long an idle session may sit in the in-memory store before a sweep
/// drops it. Not currently exposed as a config field — `SessionStore` is
/// pluggable precisely so a deployment that needs a different policy
/// supplies its own store instead of tuning this one (DESIGN.md).
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Global count of SIGINT/SIGTERM deliveries since the process started.
/// Incremented from signal-handler context, so it has to be a bare
/// atomic — no locks, no allocation, nothing that isn't async-signal-safe.
/// A second signal aborts the process immediately instead of waiting for
/// a graceful shutdown that may never finish (SPEC_FULL.md §D.7).
static SIGNAL_COUNT: AtomicUsize = AtomicUsize::new(0);
static SIGNAL_INSTALL: Once = Once::new();

fn handle_shutdown_signal() {
    if SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst) >= 1 {
        std::process::abort();
    }
}

/// Installs the SIGINT/SIGTERM handlers exactly once per process and
/// spawns a small thread whose only job is noticing the flag and waking
/// the given poller — a signal handler cannot safely touch a `mio::Poll`
/// directly, so the handler only flips an atomic and this thread does
/// the actual wake-up.
fn install_signal_handlers(waker: Arc<mio::Waker>) {
    SIGNAL_INSTALL.call_once(|| {
        unsafe {
            let _ = signal_hook::low_level::register(signal_hook::consts::SIGINT, handle_shutdown_signal);
            let _ = signal_hook::low_level::register(signal_hook::consts::SIGTERM, handle_shutdown_signal);
        }
        std::thread::spawn(move || loop {
            if SIGNAL_COUNT.load(Ordering::SeqCst) > 0 {
                let _ = waker.wake();
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        });
    });
}

pub fn shutdown_requested() -> bool {
    SIGNAL_COUNT.load(Ordering::SeqCst) > 0
}

struct ListenPointEntry {
    point: ListenPoint,
    limits: RequestLimits,
    timeout: Duration,
}

/// An accepted connection plus the registered `mio::net::TcpStream` the
/// poller was told about. `Transport` (inside `Connection`) reads and
/// writes through a `dup`'d copy of the same fd (see `listen_point.rs`);
/// keeping both halves in one struct means dropping it closes the socket
/// once both duplicates go out of scope, and lets the poller's readiness
/// reports stay addressed at the handle it actually registered.
struct Accepted {
    registered: mio::net::TcpStream,
    connection: Connection,
}

/// The embeddable server. Built from one or more `ServerConfig`s sharing
/// a single root `Handler` and `SessionStore` — spec.md's "a host program
/// owns construction; the library owns the event loop" split.
pub struct Server {
    poller: Poller,
    listen_points: HashMap<Token, ListenPointEntry>,
    connections: HashMap<Token, Accepted>,
    handler: Arc<dyn Handler>,
    session_store: Arc<dyn SessionStore>,
    next_token: usize,
    last_sweep: Instant,
}

impl Server {
    /// Binds a listen point for every `(host, port)` pair across
    /// `configs`, wraps TLS listen points in a `rustls::ServerConfig` per
    /// their `TlsConfig`, and installs the process-wide signal handlers
    /// unless every config opts out via `flags.no_sigterm`.
    pub fn new(configs: Vec<ServerConfig>, handler: Arc<dyn Handler>) -> Result<Self> {
        Self::with_session_store(configs, handler, Arc::new(InMemorySessionStore::new(DEFAULT_SESSION_TTL)))
    }

    pub fn with_session_store(
        configs: Vec<ServerConfig>,
        handler: Arc<dyn Handler>,
        session_store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let configs = crate::config::validate_configs(configs);
        let mut poller = Poller::new(1024)?;
        let mut listen_points = HashMap::new();
        let mut next_token = 1usize;
        let mut install_signals = false;

        for config in &configs {
            if config.username.is_some() {
                proxy_log::warn!(
                    "server config for '{}' names a username to drop privileges to, but this build does not perform privilege drop; running as the invoking user",
                    config.server_name
                );
            }
            if !config.flags.no_sigterm {
                install_signals = true;
            }

            let tls_config = match &config.tls {
                Some(tls) => Some(build_rustls_config(tls)?),
                None => None,
            };

            for &port in &config.ports {
                let token = Token(next_token);
                next_token += 1;

                let mut point = ListenPoint::bind(&config.host, port, token, tls_config.clone())?;
                point.register(poller.registry())?;
                poller.add(token, None);

                proxy_log::info!(
                    "listening on {}:{}{} for '{}'",
                    config.host,
                    port,
                    if point.tls_config.is_some() { " (tls)" } else { "" },
                    config.server_name
                );

                listen_points.insert(
                    token,
                    ListenPointEntry {
                        point,
                        limits: limits_for(config),
                        timeout: config.timeout(),
                    },
                );
            }
        }

        if install_signals {
            install_signal_handlers(poller.waker_handle());
        }

        Ok(Server {
            poller,
            listen_points,
            connections: HashMap::new(),
            handler,
            session_store,
            next_token,
            last_sweep: Instant::now(),
        })
    }

    /// Requests a clean shutdown: `run`'s blocking `poll()` call is woken
    /// and the loop exits once it observes `is_stopped()`.
    pub fn stop(&mut self) {
        self.poller.stop();
    }

    pub fn local_addrs(&self) -> Vec<std::net::SocketAddr> {
        self.listen_points.values().map(|e| e.point.addr).collect()
    }

    /// Drives the event loop until `stop()` is called or a shutdown
    /// signal is observed. Blocks the calling thread.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.poller.is_stopped() || shutdown_requested() {
                proxy_log::info!("shutting down");
                return Ok(());
            }

            let events = self.poller.poll()?;
            for event in events {
                match event {
                    PollEvent::Ready { token, readable, writable } => {
                        self.handle_ready(token, readable, writable)?;
                    }
                    PollEvent::Expired { token } => {
                        self.connections.remove(&token);
                    }
                }
            }

            if shutdown_requested() {
                proxy_log::info!("shutting down");
                return Ok(());
            }

            if self.session_store_needs_sweep() {
                self.session_store.sweep_expired();
                self.last_sweep = Instant::now();
            }
        }
    }

    fn session_store_needs_sweep(&self) -> bool {
        self.last_sweep.elapsed() > SESSION_SWEEP_INTERVAL
    }

    fn handle_ready(&mut self, token: Token, readable: bool, writable: bool) -> Result<()> {
        if self.listen_points.contains_key(&token) {
            self.accept_new_connections(token)?;
            return Ok(());
        }

        let Some(accepted) = self.connections.get_mut(&token) else {
            return Ok(());
        };

        match accepted.connection.drive(readable, writable) {
            DriveOutcome::Continue => {}
            DriveOutcome::Close => {
                self.connections.remove(&token);
                self.poller.remove(token);
            }
        }
        Ok(())
    }

    fn accept_new_connections(&mut self, listen_token: Token) -> Result<()> {
        let Some(entry) = self.listen_points.get_mut(&listen_token) else {
            return Ok(());
        };
        let accepted = entry.point.accept_all()?;
        let limits = entry.limits.clone();
        let timeout = entry.timeout;

        for (mut stream, peer, transport) in accepted {
            let token = Token(self.next_token);
            self.next_token += 1;

            if let Err(e) = register_rw(self.poller.registry(), &mut stream, token) {
                proxy_log::debug!("failed to register accepted socket {}: {}", peer, e);
                continue;
            }
            self.poller.add_with_shutdown(token, Some(timeout), None);

            let connection = Connection::new(
                transport,
                peer,
                limits.clone(),
                Arc::clone(&self.handler),
                Arc::clone(&self.session_store),
            );
            self.connections.insert(token, Accepted { registered: stream, connection });
        }
        Ok(())
    }
}

fn limits_for(config: &ServerConfig) -> RequestLimits {
    let mut limits = RequestLimits::default();
    limits.max_body_bytes = config.max_post_size.max(config.client_max_body_size);
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::error::ConnectionStatus;
    use crate::http::{HttpRequest, HttpResponse};

    fn ok_handler(_req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
        res.set_body(b"ok".to_vec(), "text/plain");
        ConnectionStatus::Processed
    }

    fn loopback_config(name: &str) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.host = "127.0.0.1".to_string();
        config.ports = vec![0];
        config.server_name = name.to_string();
        config
    }

    #[test]
    fn binds_an_ephemeral_port_and_reports_it() {
        let server = Server::new(vec![loopback_config("s1")], Arc::new(ok_handler)).unwrap();
        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].port() > 0);
    }

    #[test]
    fn stop_unblocks_a_running_server() {
        let mut server = Server::new(vec![loopback_config("s1")], Arc::new(ok_handler)).unwrap();
        server.stop();
        server.run().unwrap();
    }

    #[test]
    fn multiple_configs_each_get_their_own_listen_point() {
        let server = Server::new(vec![loopback_config("s1"), loopback_config("s2")], Arc::new(ok_handler)).unwrap();
        assert_eq!(server.local_addrs().len(), 2);
    }
}
