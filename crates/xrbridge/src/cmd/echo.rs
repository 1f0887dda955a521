use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};
use xrbridge_frame::Message;
use xrbridge_reqrep::{endpoint_name, ReplyConnection, ReplyListener, ReqRepError};
use xrbridge_transport::Address;

use crate::cmd::{parse_duration, EchoArgs};
use crate::exit::{reqrep_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

enum Stop {
    Interrupted,
    AcceptFailed(ReqRepError),
}

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    let delay = args.delay.as_deref().map(parse_duration).transpose()?;
    let listener = ReplyListener::bind(&Address::new(args.host.clone(), args.port))
        .map_err(|err| reqrep_error("bind failed", err))?;
    let local = listener.local_addr();
    print_listening(local, format);
    info!(addr = %local, "echo backend listening");

    let (stop_tx, stop_rx) = mpsc::channel();
    install_ctrlc_handler(stop_tx.clone())?;
    thread::Builder::new()
        .name("xrbridge-echo".to_string())
        .spawn(move || {
            let err = accept_loop(&listener, delay);
            let _ = stop_tx.send(Stop::AcceptFailed(err));
        })
        .map_err(|err| CliError::new(INTERNAL, format!("echo thread failed to start: {err}")))?;

    match stop_rx.recv() {
        Ok(Stop::AcceptFailed(err)) => Err(reqrep_error("accept failed", err)),
        Ok(Stop::Interrupted) | Err(_) => {
            info!("echo backend stopped");
            Ok(SUCCESS)
        }
    }
}

/// Serve each client on its own thread; a bridge holds two connections.
fn accept_loop(listener: &ReplyListener, delay: Option<Duration>) -> ReqRepError {
    loop {
        let conn = match listener.accept() {
            Ok(conn) => conn,
            Err(err) => return err,
        };
        let spawned = thread::Builder::new()
            .name("xrbridge-echo-conn".to_string())
            .spawn(move || serve(conn, delay));
        if let Err(err) = spawned {
            warn!(error = %err, "connection thread failed to start");
        }
    }
}

fn serve(mut conn: ReplyConnection, delay: Option<Duration>) {
    debug!("client connected");
    let result = conn.serve(|request| {
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        echo_reply(request)
    });
    match result {
        Ok(()) => debug!("client disconnected"),
        Err(err) => debug!(error = %err, "client dropped"),
    }
    conn.close();
}

/// The payload, or the endpoint code for bare requests.
fn echo_reply(request: &Message) -> Bytes {
    let parts = request.parts();
    if let Some(endpoint) = parts.first() {
        info!(
            endpoint = %String::from_utf8_lossy(endpoint),
            name = endpoint_name(std::str::from_utf8(endpoint).unwrap_or("")),
            bytes = request.payload_len(),
            "echoing request"
        );
    }
    parts.last().cloned().unwrap_or_default()
}

fn install_ctrlc_handler(stop: mpsc::Sender<Stop>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = stop.send(Stop::Interrupted);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
