use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace};
use xrbridge_frame::{FrameError, Message, SocketType, ZmtpStream, MAX_PARTS};
use xrbridge_transport::{TcpTransport, TransportStream};

use crate::error::{ReqRepError, Result};
use crate::tcp::{RequesterConfig, MIN_TIMEOUT};
use crate::traits::{Connector, Transport};

/// Request side of a ZMTP connection to a REP backend.
///
/// Requests go out behind the empty delimiter frame a REP socket expects;
/// the delimiter is stripped from replies. Commands the peer sends between
/// messages (heartbeats) are skipped.
pub struct ZmtpRequester {
    stream: ZmtpStream<TransportStream>,
    partial: Message,
    delimiter_seen: bool,
    slice: Option<Duration>,
}

impl ZmtpRequester {
    /// Connect and handshake, both bounded by the connect timeout.
    pub fn connect(config: &RequesterConfig) -> Result<Self> {
        let stream = TcpTransport::connect(&config.address, config.connect_timeout)?;
        stream.set_write_timeout(Some(config.write_timeout.max(MIN_TIMEOUT)))?;
        let handshake_bound = config.connect_timeout.max(MIN_TIMEOUT);
        stream.set_read_timeout(Some(handshake_bound))?;

        let mut stream = ZmtpStream::new(stream, config.max_payload_size);
        stream.handshake(SocketType::Req, SocketType::Rep)?;

        Ok(Self {
            stream,
            partial: Message::new(),
            delimiter_seen: false,
            slice: Some(handshake_bound),
        })
    }

    fn set_slice(&mut self, slice: Duration) -> Result<()> {
        let slice = slice.max(MIN_TIMEOUT);
        if self.slice != Some(slice) {
            self.stream.get_ref().set_read_timeout(Some(slice))?;
            self.slice = Some(slice);
        }
        Ok(())
    }
}

impl Transport for ZmtpRequester {
    fn send(&mut self, message: &Message) -> Result<()> {
        let mut parts = Vec::with_capacity(message.len() + 1);
        parts.push(Bytes::new());
        parts.extend_from_slice(message.parts());
        self.stream.send_parts(&parts)?;
        debug!(
            parts = message.len(),
            bytes = message.payload_len(),
            "request written"
        );
        Ok(())
    }

    fn recv(&mut self, slice: Duration) -> Result<Option<Message>> {
        self.set_slice(slice)?;
        loop {
            let frame = match self.stream.try_read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(FrameError::ConnectionClosed) => return Err(ReqRepError::Disconnected),
                Err(err) => return Err(err.into()),
            };

            if frame.is_command() {
                trace!(bytes = frame.payload.len(), "skipping zmtp command");
                continue;
            }
            if !self.delimiter_seen {
                if !frame.payload.is_empty() || !frame.has_more() {
                    return Err(ReqRepError::Protocol(
                        "reply is missing the empty delimiter frame".to_string(),
                    ));
                }
                self.delimiter_seen = true;
                continue;
            }

            if self.partial.len() == MAX_PARTS {
                return Err(FrameError::TooManyParts { max: MAX_PARTS }.into());
            }
            let more = frame.has_more();
            self.partial.push(frame.payload);
            if !more {
                self.delimiter_seen = false;
                return Ok(Some(std::mem::take(&mut self.partial)));
            }
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.stream.get_ref().close() {
            debug!(error = %err, "close failed");
        }
    }
}

/// Opens [`ZmtpRequester`]s to one backend address.
#[derive(Debug, Clone, Default)]
pub struct ZmtpConnector {
    config: RequesterConfig,
}

impl ZmtpConnector {
    pub fn new(config: RequesterConfig) -> Self {
        Self { config }
    }
}

impl Connector for ZmtpConnector {
    type Transport = ZmtpRequester;

    fn connect(&mut self) -> Result<ZmtpRequester> {
        let requester = ZmtpRequester::connect(&self.config)?;
        info!(addr = %self.config.address, wire = "zmtp", "connected to backend");
        Ok(requester)
    }

    fn target(&self) -> String {
        format!("zmtp://{}", self.config.address)
    }
}
