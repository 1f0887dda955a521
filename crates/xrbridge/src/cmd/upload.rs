use std::fs;
use std::time::Instant;

use bytes::Bytes;
use xrbridge_core::{Bridge, BridgeConfig, ChannelConfig, UploadStats, UploaderConfig};

use crate::cmd::{parse_duration, UploadArgs, TICK};
use crate::exit::{io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_upload, OutputFormat};

pub fn run(args: UploadArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let interval = parse_duration(&args.interval)?;
    if args.repeat == 0 {
        return Err(CliError::new(USAGE, "--repeat must be at least 1"));
    }
    let frame = fs::read(&args.file)
        .map(Bytes::from)
        .map_err(|err| io_error(&format!("failed reading {}", args.file.display()), err))?;

    let address = args.backend.address();
    let backend = address.to_string();
    let config = BridgeConfig::default()
        .with_address(address)
        .with_wire(args.backend.wire())
        .with_channel(ChannelConfig::default().with_connect_eagerly(false))
        .with_upload(UploaderConfig::default().with_reply_timeout(timeout));
    let bridge = Bridge::connect(config)
        .map_err(|err| CliError::new(INTERNAL, format!("bridge start failed: {err}")))?;

    for _ in 0..args.repeat {
        bridge.set_frame(frame.clone());
        std::thread::sleep(interval);
    }

    let deadline = Instant::now().checked_add(timeout);
    while !settled(current_stats(&bridge), args.repeat) && !expired(deadline) {
        std::thread::sleep(TICK);
    }
    bridge.shutdown();

    let stats = current_stats(&bridge);
    print_upload(&backend, frame.len(), args.repeat, stats, format);
    if stats.sent == 0 {
        return Err(CliError::new(
            FAILURE,
            format!("no frame was acknowledged by {backend}"),
        ));
    }
    Ok(SUCCESS)
}

fn current_stats(bridge: &Bridge) -> UploadStats {
    bridge.upload_stats().unwrap_or_default()
}

/// `None` is a timeout too large to represent, which never expires.
fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Every offered frame was sent, replaced by a newer one, or failed.
fn settled(stats: UploadStats, offered: usize) -> bool {
    stats.sent + stats.overwritten + stats.failed >= offered as u64
}
