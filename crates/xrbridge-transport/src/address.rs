use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Default backend host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default backend port.
pub const DEFAULT_PORT: u16 = 5555;

/// Host/port pair of the compute backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback address on the given port.
    pub fn loopback(port: u16) -> Self {
        Self::new(DEFAULT_HOST, port)
    }

    /// Resolve to the first socket address.
    pub fn resolve(&self) -> Result<SocketAddr> {
        let addrs = self.resolve_all()?;
        Ok(addrs[0])
    }

    /// Resolve to every socket address the host maps to, in resolver order.
    ///
    /// Never returns an empty list.
    pub fn resolve_all(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Resolve {
                addr: self.to_string(),
                source: e,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Resolve {
                addr: self.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no socket addresses returned",
                ),
            });
        }
        Ok(addrs)
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::loopback(DEFAULT_PORT)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
