//! The protocol boundary: a bound, listening socket plus whatever
//! transport wrapping (plain TCP or TLS) a connection accepted on it
//! needs before request bytes can be read from it.
//!
//! Grounded on the teacher's listener setup in `src/bin/main.rs` (bind,
//! `set_reuseaddr`-equivalent via `mio::net::TcpListener::bind`, register
//! with the poller) and on `cpkb-bluezoo-tagliacarte`'s `HttpStream`
//! enum (`Plain`/`Tls` variants dispatching `read`/`write` through one
//! type) for the split between a socket that is a transport in its own
//! right and one that has a TLS record layer in front of it — the
//! closest available precedent for this enum shape in the example pack.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};

use crate::config::TlsConfig;

/// Per-connection transport: either a bare TCP stream or a TCP stream
/// with a rustls server session multiplexed in front of it. Both
/// variants expose the same `Read`/`Write` contract to the connection
/// layer, which never needs to know which one it has.
pub enum Transport {
    Plain(TcpStream),
    Tls {
        stream: TcpStream,
        session: Box<rustls::ServerConnection>,
    },
}

impl Transport {
    pub fn plain(stream: TcpStream) -> Self {
        Transport::Plain(stream)
    }

    pub fn tls(stream: TcpStream, session: rustls::ServerConnection) -> Self {
        Transport::Tls {
            stream,
            session: Box::new(session),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls { .. })
    }

    /// Drives the TLS handshake as far as currently-buffered socket data
    /// allows. A plain transport is always considered handshaked.
    /// Returns `Ok(true)` once the handshake has completed.
    pub fn advance_handshake(&mut self) -> io::Result<bool> {
        match self {
            Transport::Plain(_) => Ok(true),
            Transport::Tls { stream, session } => {
                if !session.is_handshaking() {
                    return Ok(true);
                }
                if session.wants_read() {
                    match session.read_tls(stream) {
                        Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "tls peer closed mid-handshake")),
                        Ok(_) => {
                            session
                                .process_new_packets()
                                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(e),
                    }
                }
                if session.wants_write() {
                    session.write_tls(stream)?;
                }
                Ok(!session.is_handshaking())
            }
        }
    }

    pub fn socket_mut(&mut self) -> &mut TcpStream {
        match self {
            Transport::Plain(s) => s,
            Transport::Tls { stream, .. } => stream,
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls { stream, session } => {
                match session.read_tls(stream) {
                    Ok(0) => {}
                    Ok(_) => {
                        session
                            .process_new_packets()
                            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
                session.reader().read(buf)
            }
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls { stream, session } => {
                let n = session.writer().write(buf)?;
                if session.wants_write() {
                    session.write_tls(stream)?;
                }
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls { stream, session } => {
                while session.wants_write() {
                    session.write_tls(stream)?;
                }
                Ok(())
            }
        }
    }
}

/// Loads a `rustls::ServerConfig` from the declarative `TlsConfig`,
/// supporting only the cert/key-file form — PKCS#12 and CRL handling
/// are accepted as config fields for forward-compatibility but rejected
/// at load time until a deployment actually needs them (tracked as an
/// open question in DESIGN.md rather than half-implemented here).
pub fn build_rustls_config(tls: &TlsConfig) -> io::Result<Arc<rustls::ServerConfig>> {
    if tls.pkcs12.is_some() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "pkcs12 certificate bundles are not supported by this build",
        ));
    }

    use rustls::pki_types::{CertificateDer, PrivateKeyDer};

    let cert_bytes = std::fs::read(&tls.cert)?;
    let key_bytes = std::fs::read(&tls.key)?;

    let certs: Vec<CertificateDer<'static>> = if tls.der {
        vec![CertificateDer::from(cert_bytes)]
    } else {
        rustls_pemfile::certs(&mut cert_bytes.as_slice()).collect::<io::Result<Vec<_>>>()?
    };

    let key: PrivateKeyDer<'static> = if tls.der {
        PrivateKeyDer::try_from(key_bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
    } else {
        let mut reader = key_bytes.as_slice();
        rustls_pemfile::private_key(&mut reader)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))?
    };

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(Arc::new(config))
}

/// A bound, registered listening socket. One `ListenPoint` exists per
/// configured `(host, port)` pair; `accept` is called in response to the
/// poller reporting its token readable.
pub struct ListenPoint {
    pub listener: TcpListener,
    pub token: Token,
    pub addr: SocketAddr,
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
}

impl ListenPoint {
    pub fn bind(host: &str, port: u16, token: Token, tls_config: Option<Arc<rustls::ServerConfig>>) -> io::Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{e}")))?;
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        Ok(ListenPoint {
            listener,
            token,
            addr,
            tls_config,
        })
    }

    pub fn register(&mut self, registry: &mio::Registry) -> io::Result<()> {
        registry.register(&mut self.listener, self.token, Interest::READABLE)
    }

    /// Accepts every pending connection on this listen point (edge-
    /// triggered readiness means more than one may be queued), wrapping
    /// each in the transport this listen point is configured for.
    pub fn accept_all(&mut self) -> io::Result<Vec<(TcpStream, SocketAddr, Transport)>> {
        let mut out = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let transport = match &self.tls_config {
                        Some(cfg) => {
                            let session = rustls::ServerConnection::new(Arc::clone(cfg))
                                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                            // the accepted stream is consumed twice below:
                            // once into the transport, the caller keeps no
                            // separate handle to it.
                            Transport::tls(clone_stream_handle(&stream)?, session)
                        }
                        None => Transport::plain(clone_stream_handle(&stream)?),
                    };
                    out.push((stream, peer, transport));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

/// `mio::net::TcpStream` has no `Clone`; the transport owns the actual
/// accepted socket while the caller's copy is dropped immediately, so
/// this duplicates the fd via `try_clone` on the underlying std socket
/// rather than keeping two live `mio` registrations for one fd.
fn clone_stream_handle(stream: &TcpStream) -> io::Result<TcpStream> {
    use std::os::unix::io::{AsRawFd, FromRawFd};
    let raw = stream.as_raw_fd();
    let std_stream = unsafe { std::net::TcpStream::from_raw_fd(raw) };
    let cloned = std_stream.try_clone();
    std::mem::forget(std_stream);
    let cloned = cloned?;
    cloned.set_nonblocking(true)?;
    Ok(TcpStream::from_std(cloned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_and_reports_local_addr() {
        let mut lp = ListenPoint::bind("127.0.0.1", 0, Token(1), None).unwrap();
        assert!(lp.listener.local_addr().unwrap().port() > 0);
        assert!(!lp.addr_is_tls());
    }

    trait TestExt {
        fn addr_is_tls(&self) -> bool;
    }
    impl TestExt for ListenPoint {
        fn addr_is_tls(&self) -> bool {
            self.tls_config.is_some()
        }
    }
}
