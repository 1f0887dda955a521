use std::time::Duration;

use xrbridge_frame::DEFAULT_MAX_PAYLOAD;
use xrbridge_reqrep::endpoint::FRAME_UPLOAD;
use xrbridge_reqrep::{Endpoint, RequesterConfig, Wire};
use xrbridge_transport::{Address, TcpTransport};

/// What `submit` does while a request is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Refuse immediately with `SubmitError::Busy`.
    #[default]
    Reject,
    /// Wait up to the bound for the slot to free, then refuse.
    Wait(Duration),
}

/// Request channel behavior.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upper bound on waiting for one reply.
    pub reply_timeout: Duration,
    /// Receive slice; also bounds how long shutdown waits on a stuck reply.
    pub poll_interval: Duration,
    /// What a submit does while busy.
    pub busy_policy: BusyPolicy,
    /// Connect when the worker starts rather than on the first request.
    pub connect_eagerly: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            busy_policy: BusyPolicy::Reject,
            connect_eagerly: true,
        }
    }
}

impl ChannelConfig {
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn with_connect_eagerly(mut self, eager: bool) -> Self {
        self.connect_eagerly = eager;
        self
    }
}

/// Stream uploader behavior.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Endpoint code sent as the first part of each upload.
    pub endpoint: Endpoint,
    /// Upper bound on waiting for the (discarded) reply.
    pub reply_timeout: Duration,
    /// Receive slice; also bounds how long shutdown waits.
    pub poll_interval: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::from_static(FRAME_UPLOAD),
            reply_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl UploaderConfig {
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

/// Everything needed to start a [`Bridge`](crate::Bridge) against a TCP
/// backend.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Backend address.
    pub address: Address,
    /// Framing spoken to the backend.
    pub wire: Wire,
    /// Bound on establishing each connection.
    pub connect_timeout: Duration,
    /// Bound on writing one request.
    pub write_timeout: Duration,
    /// Largest part accepted in either direction.
    pub max_payload_size: usize,
    /// Request channel behavior.
    pub channel: ChannelConfig,
    /// Frame uploader; `None` disables streaming.
    pub upload: Option<UploaderConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: Address::default(),
            wire: Wire::default(),
            connect_timeout: TcpTransport::DEFAULT_CONNECT_TIMEOUT,
            write_timeout: Duration::from_secs(2),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            channel: ChannelConfig::default(),
            upload: None,
        }
    }
}

impl BridgeConfig {
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    pub fn with_wire(mut self, wire: Wire) -> Self {
        self.wire = wire;
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_upload(mut self, upload: UploaderConfig) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Connection settings shared by the request and upload connections.
    pub fn requester_config(&self) -> RequesterConfig {
        RequesterConfig {
            address: self.address.clone(),
            connect_timeout: self.connect_timeout,
            write_timeout: self.write_timeout,
            max_payload_size: self.max_payload_size,
        }
    }
}
