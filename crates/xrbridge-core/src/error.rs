use std::time::Duration;

use xrbridge_reqrep::ReqRepError;

/// Why a submitted request produced no reply.
///
/// Always delivered through [`Poll::Ready`](crate::Poll::Ready); never
/// panics or tears down the worker.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The connection could not be established or re-established.
    #[error("cannot connect to {target}: {source}")]
    Connection {
        target: String,
        source: ReqRepError,
    },

    /// A send or receive failed mid-exchange. The connection was dropped
    /// and the next request reconnects.
    #[error("exchange desynchronized: {0}")]
    Desync(#[source] ReqRepError),

    /// No reply within the configured bound. The connection was dropped.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The request was abandoned because the channel shut down.
    #[error("request abandoned by shutdown")]
    ShutdownAbort,

    /// The worker thread died unexpectedly. The channel is closed.
    #[error("request worker stopped unexpectedly")]
    WorkerFailed,

    /// The channel is closed; nothing more will be delivered.
    #[error("request channel is closed")]
    Closed,
}

impl RequestError {
    /// Map a socket-level failure onto the request taxonomy.
    pub(crate) fn from_exchange(err: ReqRepError) -> Self {
        match err {
            ReqRepError::Timeout(bound) => RequestError::Timeout(bound),
            ReqRepError::Cancelled => RequestError::ShutdownAbort,
            other => RequestError::Desync(other),
        }
    }

    /// Short stable label for logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::Connection { .. } => "connection",
            RequestError::Desync(_) => "desync",
            RequestError::Timeout(_) => "timeout",
            RequestError::ShutdownAbort => "shutdown-abort",
            RequestError::WorkerFailed => "worker-failed",
            RequestError::Closed => "closed",
        }
    }
}

/// Why a submit was refused. The request was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// A request is in flight or its result has not been consumed.
    #[error("a request is already outstanding")]
    Busy,

    /// The channel has shut down.
    #[error("request channel is closed")]
    Closed,
}

/// Errors constructing the bridge itself.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}
