use std::time::Duration;

use crate::socket::Phase;

/// Errors that can occur on a request/reply socket.
#[derive(Debug, thiserror::Error)]
pub enum ReqRepError {
    /// Transport-level error (connect, resolve, raw I/O).
    #[error("transport error: {0}")]
    Transport(#[from] xrbridge_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] xrbridge_frame::FrameError),

    /// A send or receive was attempted in the wrong phase.
    #[error("cannot {operation} while {phase}")]
    OutOfSequence {
        operation: &'static str,
        phase: Phase,
    },

    /// A previous failure left the alternation broken; reconnect first.
    #[error("socket is desynchronized and must be reconnected")]
    Broken,

    /// The peer violated the message shape (e.g. multipart reply).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// No reply arrived within the bound.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The wait for a reply was abandoned by the caller.
    #[error("reply wait cancelled")]
    Cancelled,

    /// The peer closed the connection.
    #[error("peer disconnected")]
    Disconnected,
}

impl ReqRepError {
    /// Whether the error happened while establishing a connection.
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            ReqRepError::Transport(
                xrbridge_transport::TransportError::Connect { .. }
                    | xrbridge_transport::TransportError::Resolve { .. }
            ) | ReqRepError::Frame(xrbridge_frame::FrameError::Handshake(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, ReqRepError>;
