use std::time::Duration;

use bytes::Bytes;
use tracing::info;
use xrbridge_reqrep::{Endpoint, TcpConnector, Wire, ZmtpConnector};

use crate::channel::{ChannelState, Poll, RequestChannel, RequestId};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, SubmitError};
use crate::uploader::{StreamUploader, UploadStats};

/// What a frame-driven front end talks to.
///
/// Submit once per logical operation, [`poll`](Bridge::poll) every tick
/// until the result appears, consume it. None of these calls perform I/O.
#[derive(Debug)]
pub struct Bridge {
    channel: RequestChannel,
    uploader: Option<StreamUploader>,
}

impl Bridge {
    /// Start a request worker, and an uploader if configured, against the
    /// TCP backend in `config`. Each gets its own connection.
    pub fn connect(config: BridgeConfig) -> Result<Self, BridgeError> {
        let requester = config.requester_config();
        info!(
            addr = %requester.address,
            wire = %config.wire,
            upload = config.upload.is_some(),
            "starting bridge"
        );

        let (channel, uploader) = match config.wire {
            Wire::Xr => (
                RequestChannel::spawn(TcpConnector::new(requester.clone()), config.channel)?,
                config
                    .upload
                    .map(|upload| StreamUploader::spawn(TcpConnector::new(requester), upload))
                    .transpose()?,
            ),
            Wire::Zmtp => (
                RequestChannel::spawn(ZmtpConnector::new(requester.clone()), config.channel)?,
                config
                    .upload
                    .map(|upload| StreamUploader::spawn(ZmtpConnector::new(requester), upload))
                    .transpose()?,
            ),
        };

        Ok(Self::from_parts(channel, uploader))
    }

    /// Assemble from already running parts.
    pub fn from_parts(channel: RequestChannel, uploader: Option<StreamUploader>) -> Self {
        Self { channel, uploader }
    }

    /// See [`RequestChannel::submit`].
    pub fn submit(
        &self,
        endpoint: impl Into<Endpoint>,
        payload: Option<Bytes>,
    ) -> Result<RequestId, SubmitError> {
        self.channel.submit(endpoint, payload)
    }

    /// See [`RequestChannel::poll`].
    pub fn poll(&self) -> Poll {
        self.channel.poll()
    }

    /// See [`RequestChannel::wait`].
    pub fn wait(&self, timeout: Duration) -> Poll {
        self.channel.wait(timeout)
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Offer a camera frame. Returns false when streaming is disabled.
    pub fn set_frame(&self, frame: impl Into<Bytes>) -> bool {
        match &self.uploader {
            Some(uploader) => {
                uploader.set_frame(frame);
                true
            }
            None => false,
        }
    }

    pub fn upload_stats(&self) -> Option<UploadStats> {
        self.uploader.as_ref().map(StreamUploader::stats)
    }

    /// Stop both workers and join them.
    pub fn shutdown(&self) {
        if let Some(uploader) = &self.uploader {
            uploader.shutdown();
        }
        self.channel.shutdown();
        info!("bridge stopped");
    }
}
