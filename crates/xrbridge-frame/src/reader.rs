use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::trace;
use xrbridge_transport::TransportStream;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::{Message, MAX_PARTS};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Bytes already received survive a read timeout, so a timed-out
/// [`FrameReader::try_read_frame`] can simply be called again.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    /// A read timeout on the stream surfaces as `FrameError::Io`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Read the next frame, or `Ok(None)` if the stream's read timeout
    /// elapsed first.
    pub fn try_read_frame(&mut self) -> Result<Option<Frame>> {
        match self.read_frame() {
            Ok(frame) => Ok(Some(frame)),
            Err(err) if err.is_timeout() => {
                trace!(buffered = self.buf.len(), "read slice elapsed");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Read frames until one without the more flag (blocking).
    pub fn read_message(&mut self) -> Result<Message> {
        let mut message = Message::new();
        loop {
            let frame = self.read_frame()?;
            if message.len() == MAX_PARTS {
                return Err(FrameError::TooManyParts { max: MAX_PARTS });
            }
            let more = frame.has_more();
            message.push(frame.payload);
            if !more {
                return Ok(message);
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
            return Ok(());
        }
    }
}

impl FrameReader<TransportStream> {
    /// Create a frame reader for a transport stream and apply the read
    /// timeout from config.
    pub fn with_config_stream(inner: TransportStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: xrbridge_transport::TransportError) -> FrameError {
    match err {
        xrbridge_transport::TransportError::Io(io)
        | xrbridge_transport::TransportError::Accept(io) => FrameError::Io(io),
        xrbridge_transport::TransportError::Bind { source, .. }
        | xrbridge_transport::TransportError::Connect { source, .. }
        | xrbridge_transport::TransportError::Resolve { source, .. } => FrameError::Io(source),
    }
}
