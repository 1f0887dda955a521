//! Non-blocking bridge between a frame-driven caller and a blocking
//! request/reply backend.
//!
//! The caller never touches the socket. It submits one request at a time
//! through a [`RequestChannel`] and polls for the result every tick; a
//! dedicated worker thread owns the connection, performs the exchange, and
//! publishes the result. A [`StreamUploader`] pushes the latest camera frame
//! over its own connection so the two never contend.
//!
//! [`Bridge`] bundles both behind the small surface a render loop needs.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod frame_buffer;
mod link;
pub mod uploader;
mod worker;

#[cfg(test)]
mod mock;

pub use bridge::Bridge;
pub use channel::{ChannelState, Poll, Request, RequestChannel, RequestId};
pub use config::{BridgeConfig, BusyPolicy, ChannelConfig, UploaderConfig};
pub use error::{BridgeError, RequestError, SubmitError};
pub use frame_buffer::FrameBuffer;
pub use uploader::{StreamUploader, UploadStats};
