//! TCP connection layer for the xrbridge request/reply bridge.
//!
//! Provides the byte-level pieces everything else builds on:
//! - [`Address`]: configurable host/port pair (loopback:5555 by default)
//! - [`TcpTransport`]: bounded connect for clients, bind/accept for backends
//! - [`TransportStream`]: a connected `Read + Write` stream with timeouts
//!
//! This layer knows nothing about frames or request/reply alternation.

pub mod address;
pub mod error;
pub mod stream;
pub mod tcp;

pub use address::{Address, DEFAULT_HOST, DEFAULT_PORT};
pub use error::{Result, TransportError};
pub use stream::TransportStream;
pub use tcp::TcpTransport;
