/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x5852 \"XR\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The header carries flag bits this codec does not understand.
    #[error("unknown frame flags 0x{0:04x}")]
    UnknownFlags(u16),

    /// A message must have at least one part.
    #[error("message has no parts")]
    EmptyMessage,

    /// A multipart message exceeded the part limit.
    #[error("message has too many parts (max {max})")]
    TooManyParts { max: usize },

    /// The peer's ZMTP greeting or READY command was not acceptable.
    #[error("zmtp handshake failed: {0}")]
    Handshake(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this is a read/write timeout that left the stream intact.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
