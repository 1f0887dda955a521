use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::address::Address;
use crate::error::{Result, TransportError};
use crate::stream::TransportStream;

/// TCP transport.
///
/// Clients use [`TcpTransport::connect`]; a backend (or a test double of one)
/// uses [`TcpTransport::bind`] followed by [`TcpTransport::accept`].
pub struct TcpTransport {
    listener: TcpListener,
    local: SocketAddr,
}

impl TcpTransport {
    /// Default bound on establishing a connection.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Shortest bound a single connection attempt is given.
    pub const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(1);

    /// Bind and listen on the given address.
    ///
    /// Port 0 picks an ephemeral port; see [`TcpTransport::local_addr`].
    pub fn bind(addr: &Address) -> Result<Self> {
        let resolved = addr.resolve()?;
        let listener = TcpListener::bind(resolved).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(%local, "listening on tcp");

        Ok(Self { listener, local })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<TransportStream> {
        let (stream, remote) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%remote, "accepted connection");
        TransportStream::from_tcp(stream)
    }

    /// Connect to a listening backend, bounded by `timeout`.
    ///
    /// Every address the host resolves to is tried in turn until one accepts
    /// or `timeout` runs out; the last failure is reported. A zero `timeout`
    /// is raised to [`TcpTransport::MIN_CONNECT_TIMEOUT`].
    pub fn connect(addr: &Address, timeout: Duration) -> Result<TransportStream> {
        let candidates = addr.resolve_all()?;
        let stream = connect_any(&candidates, timeout).map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
        debug!(%addr, "connected to backend");
        TransportStream::from_tcp(stream)
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

fn connect_any(candidates: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let timeout = timeout.max(TcpTransport::MIN_CONNECT_TIMEOUT);
    let deadline = Instant::now().checked_add(timeout);
    let mut last_err = None;

    for candidate in candidates {
        let budget = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                left
            }
            None => timeout,
        };
        match TcpStream::connect_timeout(candidate, budget) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%candidate, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "connect timeout elapsed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_bind_accept_connect() {
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
        let addr = Address::from(listener.local_addr());

        let handle = std::thread::spawn(move || {
            let mut client =
                TcpTransport::connect(&addr, TcpTransport::DEFAULT_CONNECT_TIMEOUT).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port that is very likely closed.
        let port = {
            let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
            listener.local_addr().port()
        };
        let result = TcpTransport::connect(&Address::loopback(port), Duration::from_millis(500));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_connect_falls_through_to_later_address() {
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();

        let stream = connect_any(
            &[closed, listener.local_addr()],
            TcpTransport::DEFAULT_CONNECT_TIMEOUT,
        )
        .unwrap();
        let _server = listener.accept().unwrap();
        assert_eq!(stream.peer_addr().unwrap(), listener.local_addr());
    }

    #[test]
    fn test_connect_reports_last_failure() {
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = connect_any(&[closed, closed], Duration::from_millis(500)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_localhost_reaches_ipv4_listener() {
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
        let port = listener.local_addr().port();

        let handle = std::thread::spawn(move || {
            let mut client = TcpTransport::connect(
                &Address::new("localhost", port),
                TcpTransport::DEFAULT_CONNECT_TIMEOUT,
            )
            .unwrap();
            client.write_all(b"hi").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        handle.join().unwrap();
    }

    #[test]
    fn test_zero_connect_timeout_is_raised_to_minimum() {
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
        let addr = Address::from(listener.local_addr());

        let client = TcpTransport::connect(&addr, Duration::ZERO).unwrap();
        let _server = listener.accept().unwrap();
        client.close().unwrap();
    }

    #[test]
    fn test_read_timeout_is_reported_as_timeout() {
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
        let addr = Address::from(listener.local_addr());

        let client = TcpTransport::connect(&addr, TcpTransport::DEFAULT_CONNECT_TIMEOUT).unwrap();
        let _server = listener.accept().unwrap();

        let mut client = client;
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut buf = [0u8; 1];
        let err = client.read(&mut buf).unwrap_err();
        assert!(TransportError::Io(err).is_timeout());
    }

    #[test]
    fn test_close_signals_eof_to_peer() {
        let listener = TcpTransport::bind(&Address::loopback(0)).unwrap();
        let addr = Address::from(listener.local_addr());

        let client = TcpTransport::connect(&addr, TcpTransport::DEFAULT_CONNECT_TIMEOUT).unwrap();
        let mut server = listener.accept().unwrap();

        client.close().unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }
}
