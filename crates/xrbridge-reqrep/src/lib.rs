//! Strict request/reply sockets.
//!
//! A request socket alternates send and receive; it is never used from two
//! threads and never sends twice without a reply in between. This crate
//! makes that discipline structural:
//!
//! - [`Transport`] / [`Connector`]: the seam the bridge core is generic over
//!   (TCP with `"XR"` framing or ZMTP in production, in-memory doubles in
//!   tests)
//! - [`ReqSocket`]: the two-phase state machine wrapping a transport
//! - [`ReplyListener`]: the backend side, for diagnostics and tests
//! - [`endpoint`]: the backend's endpoint vocabulary

pub mod endpoint;
pub mod error;
pub mod reply;
pub mod socket;
pub mod tcp;
pub mod traits;
pub mod zmtp;

pub use endpoint::{endpoint_name, Endpoint, EndpointInfo, ENDPOINTS};
pub use error::{ReqRepError, Result};
pub use reply::{ReplyConnection, ReplyListener};
pub use socket::{Phase, ReqSocket};
pub use tcp::{RequesterConfig, TcpConnector, TcpRequester, Wire};
pub use traits::{Connector, Transport};
pub use zmtp::{ZmtpConnector, ZmtpRequester};
