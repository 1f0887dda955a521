use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use xrbridge_frame::{
    FrameConfig, FrameError, FrameReader, FrameWriter, Message, DEFAULT_MAX_PAYLOAD, MAX_PARTS,
};
use xrbridge_transport::{Address, TcpTransport, TransportStream};

use crate::error::{ReqRepError, Result};
use crate::traits::{Connector, Transport};

/// Smallest read slice or write bound handed to the socket; std rejects a
/// zero timeout.
pub(crate) const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Connection settings for a TCP requester.
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Backend address.
    pub address: Address,
    /// Bound on establishing the connection. Zero is raised to one
    /// millisecond.
    pub connect_timeout: Duration,
    /// Bound on writing one request. Zero is raised to one millisecond.
    pub write_timeout: Duration,
    /// Largest part accepted in either direction.
    pub max_payload_size: usize,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            address: Address::default(),
            connect_timeout: TcpTransport::DEFAULT_CONNECT_TIMEOUT,
            write_timeout: Duration::from_secs(2),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl RequesterConfig {
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }
}

/// Framing spoken on a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wire {
    /// This workspace's `"XR"` length-prefixed framing.
    #[default]
    Xr,
    /// ZMTP 3.0, as spoken by a stock message-queue REP socket.
    Zmtp,
}

impl Wire {
    pub fn as_str(self) -> &'static str {
        match self {
            Wire::Xr => "xr",
            Wire::Zmtp => "zmtp",
        }
    }
}

impl std::fmt::Display for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request side of a TCP connection.
pub struct TcpRequester {
    reader: FrameReader<TransportStream>,
    writer: FrameWriter<TransportStream>,
    partial: Message,
    slice: Option<Duration>,
}

impl TcpRequester {
    /// Connect to the backend described by `config`.
    pub fn connect(config: &RequesterConfig) -> Result<Self> {
        let stream = TcpTransport::connect(&config.address, config.connect_timeout)?;
        let reader_stream = stream.try_clone()?;

        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
            read_timeout: None,
            write_timeout: Some(config.write_timeout.max(MIN_TIMEOUT)),
        };

        let reader = FrameReader::with_config(reader_stream, frame_config.clone());
        let writer = FrameWriter::with_config_stream(stream, frame_config)?;

        Ok(Self {
            reader,
            writer,
            partial: Message::new(),
            slice: None,
        })
    }

    fn set_slice(&mut self, slice: Duration) -> Result<()> {
        let slice = slice.max(MIN_TIMEOUT);
        if self.slice != Some(slice) {
            self.reader.get_ref().set_read_timeout(Some(slice))?;
            self.slice = Some(slice);
        }
        Ok(())
    }
}

impl Transport for TcpRequester {
    fn send(&mut self, message: &Message) -> Result<()> {
        self.writer.send_message(message)?;
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
            let frame = match self.reader.try_read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(FrameError::ConnectionClosed) => return Err(ReqRepError::Disconnected),
                Err(err) => return Err(err.into()),
            };

            if self.partial.len() == MAX_PARTS {
                return Err(FrameError::TooManyParts { max: MAX_PARTS }.into());
            }
            let more = frame.has_more();
            self.partial.push(frame.payload);
            if !more {
                return Ok(Some(std::mem::take(&mut self.partial)));
            }
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.writer.get_ref().close() {
            debug!(error = %err, "close failed");
        }
    }
}

/// Opens [`TcpRequester`]s to one backend address.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: RequesterConfig,
}

impl TcpConnector {
    pub fn new(config: RequesterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RequesterConfig {
        &self.config
    }
}

impl Connector for TcpConnector {
    type Transport = TcpRequester;

    fn connect(&mut self) -> Result<TcpRequester> {
        let requester = TcpRequester::connect(&self.config)?;
        info!(addr = %self.config.address, "connected to backend");
        Ok(requester)
    }

    fn target(&self) -> String {
        self.config.address.to_string()
    }
}
