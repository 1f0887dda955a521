use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use xrbridge_reqrep::Wire;
use xrbridge_transport::{Address, DEFAULT_HOST, DEFAULT_PORT};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod endpoints;
pub mod request;
pub mod upload;
pub mod version;

/// Poll period of the CLI's stand-in render loop, about one 60 Hz frame.
pub const TICK: Duration = Duration::from_millis(16);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit one request and print the reply.
    Request(RequestArgs),
    /// Stream a frame file through the uploader.
    Upload(UploadArgs),
    /// Run a diagnostic backend that echoes every request.
    Echo(EchoArgs),
    /// List the backend's endpoint codes.
    Endpoints,
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Request(args) => request::run(args, format),
        Command::Upload(args) => upload::run(args, format),
        Command::Echo(args) => echo::run(args, format),
        Command::Endpoints => endpoints::run(format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct BackendArgs {
    /// Backend host.
    #[arg(long, env = "XRBRIDGE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,
    /// Backend port.
    #[arg(long, env = "XRBRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Framing the backend speaks: `xr` (this tool's echo backend) or `zmtp`
    /// (a message-queue REP socket).
    #[arg(long, env = "XRBRIDGE_WIRE", value_enum, default_value_t = WireArg::Xr)]
    pub wire: WireArg,
}

impl BackendArgs {
    pub fn address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }

    pub fn wire(&self) -> Wire {
        match self.wire {
            WireArg::Xr => Wire::Xr,
            WireArg::Zmtp => Wire::Zmtp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum WireArg {
    Xr,
    Zmtp,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Endpoint code (e.g. L, C, P). See `xrbridge endpoints`.
    pub endpoint: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Reply timeout (e.g. 10s, 500ms).
    #[arg(long, env = "XRBRIDGE_TIMEOUT", default_value = "10s")]
    pub timeout: String,
    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Frame file to upload (sent as-is, base64 on the wire).
    pub file: PathBuf,
    /// Offer the frame this many times.
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,
    /// Pause between offers (e.g. 16ms).
    #[arg(long, default_value = "16ms")]
    pub interval: String,
    /// Per-upload reply timeout (e.g. 10s, 500ms).
    #[arg(long, env = "XRBRIDGE_TIMEOUT", default_value = "10s")]
    pub timeout: String,
    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,
    /// Port to bind; 0 picks a free one.
    #[arg(long, env = "XRBRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Sleep before each reply, to simulate a slow backend (e.g. 2s).
    #[arg(long)]
    pub delay: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        for input in ["", "0s", "bad", "5m", "-1s"] {
            let err = parse_duration(input).expect_err(input);
            assert_eq!(err.code, USAGE);
        }
    }

    #[test]
    fn backend_address_from_args() {
        let args = BackendArgs {
            host: "10.0.0.7".to_string(),
            port: 6001,
            wire: WireArg::Zmtp,
        };
        assert_eq!(args.address().to_string(), "10.0.0.7:6001");
        assert_eq!(args.wire(), Wire::Zmtp);
    }
}
