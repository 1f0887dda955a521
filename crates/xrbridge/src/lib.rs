//! Non-blocking bridge from a frame-driven front end to a strict
//! request/reply compute backend.
//!
//! A render or game loop must never block on the network. xrbridge gives it
//! a single-slot request channel served by a worker thread that owns the
//! connection, plus a lossy uploader for camera frames.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP connection layer
//! - [`frame`]: length-prefixed multipart message framing
//! - [`reqrep`]: the strict request/reply socket and backend-side listener
//! - [`core`]: request channel, worker, stream uploader and the [`core::Bridge`] facade

/// Re-export transport types.
pub mod transport {
    pub use xrbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use xrbridge_frame::*;
}

/// Re-export request/reply types.
pub mod reqrep {
    pub use xrbridge_reqrep::*;
}

/// Re-export the bridge.
pub mod core {
    pub use xrbridge_core::*;
}
