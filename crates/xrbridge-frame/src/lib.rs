//! Length-prefixed multipart message framing.
//!
//! Every frame on the wire carries:
//! - A 2-byte magic number ("XR") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian flags word (bit 0: more parts follow)
//!
//! A [`Message`] is one or more frames; all but the last carry
//! [`FLAG_MORE`]. Requests are `[endpoint]` or `[endpoint, payload]`,
//! replies are a single part.
//!
//! [`zmtp`] carries the same messages over ZMTP 3.0 for backends built on a
//! stock message-queue REP socket.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;
pub mod zmtp;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, FLAG_MORE, HEADER_SIZE,
    MAGIC,
};
pub use error::{FrameError, Result};
pub use message::{Message, MAX_PARTS};
pub use reader::FrameReader;
pub use writer::FrameWriter;
pub use zmtp::{SocketType, ZmtpStream};
