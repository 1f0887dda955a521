use std::net::SocketAddr;

use bytes::Bytes;
use tracing::debug;
use xrbridge_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, Message};
use xrbridge_transport::{Address, TcpTransport, TransportStream};

use crate::error::{ReqRepError, Result};
use crate::socket::Phase;

/// Backend side of the request/reply protocol.
///
/// Used by the diagnostic echo backend and by tests standing in for the
/// compute service.
pub struct ReplyListener {
    transport: TcpTransport,
    frame_config: FrameConfig,
}

impl ReplyListener {
    /// Bind to a TCP address. Port 0 picks an ephemeral port.
    pub fn bind(addr: &Address) -> Result<Self> {
        let transport = TcpTransport::bind(addr)?;
        Ok(Self {
            transport,
            frame_config: FrameConfig::default(),
        })
    }

    /// Override frame limits and timeouts for accepted connections.
    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }

    /// Accept the next connection (blocking).
    pub fn accept(&self) -> Result<ReplyConnection> {
        let stream = self.transport.accept()?;
        let reader_stream = stream.try_clone()?;

        let reader = FrameReader::with_config_stream(reader_stream, self.frame_config.clone())?;
        let writer = FrameWriter::with_config_stream(stream, self.frame_config.clone())?;

        Ok(ReplyConnection {
            reader,
            writer,
            phase: Phase::Ready,
        })
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }
}

/// One accepted connection; receives a request, then sends one reply.
pub struct ReplyConnection {
    reader: FrameReader<TransportStream>,
    writer: FrameWriter<TransportStream>,
    phase: Phase,
}

impl ReplyConnection {
    /// Receive the next request (blocking).
    ///
    /// Returns [`ReqRepError::Disconnected`] when the client hangs up
    /// between requests.
    pub fn recv_request(&mut self) -> Result<Message> {
        if self.phase != Phase::Ready {
            return Err(ReqRepError::OutOfSequence {
                operation: "receive",
                phase: self.phase,
            });
        }
        let message = match self.reader.read_message() {
            Ok(message) => message,
            Err(FrameError::ConnectionClosed) => return Err(ReqRepError::Disconnected),
            Err(err) => return Err(err.into()),
        };
        debug!(parts = message.len(), "request received");
        self.phase = Phase::AwaitingReply;
        Ok(message)
    }

    /// Send the reply to the last request.
    pub fn send_reply(&mut self, reply: Bytes) -> Result<()> {
        if self.phase != Phase::AwaitingReply {
            return Err(ReqRepError::OutOfSequence {
                operation: "reply",
                phase: self.phase,
            });
        }
        self.writer.send_message(&Message::single(reply))?;
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Answer requests with `handler` until the client disconnects.
    pub fn serve<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&Message) -> Bytes,
    {
        loop {
            let request = match self.recv_request() {
                Ok(request) => request,
                Err(ReqRepError::Disconnected) => return Ok(()),
                Err(err) => return Err(err),
            };
            let reply = handler(&request);
            self.send_reply(reply)?;
        }
    }

    /// Close the connection.
    pub fn close(&self) {
        if let Err(err) = self.writer.get_ref().close() {
            debug!(error = %err, "close failed");
        }
    }
}
