use std::fmt;
use std::io;

use xrbridge_core::{RequestError, SubmitError};
use xrbridge_frame::FrameError;
use xrbridge_reqrep::ReqRepError;
use xrbridge_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::EmptyMessage => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::Handshake(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn reqrep_error(context: &str, err: ReqRepError) -> CliError {
    match err {
        ReqRepError::Transport(err) => transport_error(context, err),
        ReqRepError::Frame(err) => frame_error(context, err),
        ReqRepError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ReqRepError::Protocol(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ReqRepError::Disconnected | ReqRepError::Broken | ReqRepError::Cancelled => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn request_error(context: &str, err: RequestError) -> CliError {
    match err {
        RequestError::Connection { source, .. } => reqrep_error(context, source),
        RequestError::Desync(source) => reqrep_error(context, source),
        RequestError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RequestError::ShutdownAbort => CliError::new(FAILURE, format!("{context}: {err}")),
        RequestError::WorkerFailed | RequestError::Closed => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
    }
}

pub fn submit_error(context: &str, err: SubmitError) -> CliError {
    let code = match err {
        SubmitError::Busy => FAILURE,
        SubmitError::Closed => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
