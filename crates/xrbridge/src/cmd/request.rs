use std::fs;
use std::time::Instant;

use bytes::Bytes;
use xrbridge_core::{Bridge, BridgeConfig, ChannelConfig, Poll, RequestError};
use xrbridge_reqrep::Endpoint;

use crate::cmd::{parse_duration, RequestArgs, TICK};
use crate::exit::{
    io_error, request_error, submit_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE,
};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    if args.endpoint.is_empty() {
        return Err(CliError::new(USAGE, "endpoint must not be empty"));
    }
    let payload = resolve_payload(&args)?;

    let address = args.backend.address();
    let backend = address.to_string();
    let config = BridgeConfig::default()
        .with_address(address)
        .with_wire(args.backend.wire())
        .with_channel(ChannelConfig::default().with_reply_timeout(timeout));
    let bridge = Bridge::connect(config)
        .map_err(|err| CliError::new(INTERNAL, format!("bridge start failed: {err}")))?;

    let started = Instant::now();
    bridge
        .submit(Endpoint::from(args.endpoint.clone()), payload)
        .map_err(|err| submit_error("submit failed", err))?;
    let outcome = poll_until_ready(&bridge);
    let elapsed = started.elapsed();
    bridge.shutdown();

    let reply = outcome.map_err(|err| request_error("request failed", err))?;
    print_reply(&args.endpoint, &backend, &reply, elapsed, format);
    Ok(SUCCESS)
}

/// Drive the bridge the way a render loop would: one poll per tick.
fn poll_until_ready(bridge: &Bridge) -> Result<Bytes, RequestError> {
    loop {
        match bridge.poll() {
            Poll::Ready(outcome) => return outcome,
            Poll::Pending => std::thread::sleep(TICK),
            Poll::Idle => return Err(RequestError::Closed),
        }
    }
}

fn resolve_payload(args: &RequestArgs) -> CliResult<Option<Bytes>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Some(Bytes::from(json.clone())));
    }
    if let Some(data) = &args.data {
        return Ok(Some(Bytes::from(data.clone())));
    }
    if let Some(path) = &args.file {
        let contents = fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(Some(Bytes::from(contents)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{BackendArgs, WireArg};

    fn args() -> RequestArgs {
        RequestArgs {
            endpoint: "P".to_string(),
            json: None,
            data: None,
            file: None,
            timeout: "1s".to_string(),
            backend: BackendArgs {
                host: "127.0.0.1".to_string(),
                port: 5555,
                wire: WireArg::Xr,
            },
        }
    }

    #[test]
    fn no_payload_flags_means_bare_endpoint() {
        assert_eq!(resolve_payload(&args()).unwrap(), None);
    }

    #[test]
    fn data_is_sent_verbatim() {
        let args = RequestArgs {
            data: Some("1.0,2.0;3.0".to_string()),
            ..args()
        };
        assert_eq!(
            resolve_payload(&args).unwrap(),
            Some(Bytes::from_static(b"1.0,2.0;3.0"))
        );
    }

    #[test]
    fn invalid_json_is_usage_error() {
        let args = RequestArgs {
            json: Some("{not json".to_string()),
            ..args()
        };
        assert_eq!(resolve_payload(&args).unwrap_err().code, USAGE);
    }
}
