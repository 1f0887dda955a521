use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};
use xrbridge_reqrep::Connector;

use crate::channel::Shared;
use crate::config::ChannelConfig;
use crate::link::Link;

/// Owns the backend connection for a [`RequestChannel`](crate::RequestChannel).
///
/// Runs on its own thread: waits for the slot to fill, performs one
/// send/receive pair, publishes the outcome, repeats until closed.
pub(crate) struct Worker<C: Connector> {
    link: Link<C>,
    shared: Arc<Shared>,
    connect_eagerly: bool,
}

impl<C: Connector> Worker<C> {
    pub(crate) fn new(connector: C, shared: Arc<Shared>, config: ChannelConfig) -> Self {
        Self {
            link: Link::new(connector, config.reply_timeout, config.poll_interval),
            shared,
            connect_eagerly: config.connect_eagerly,
        }
    }

    pub(crate) fn run(mut self) {
        let _guard = AbandonOnPanic(self.shared.clone());
        info!("request worker started");

        // Failure here is not fatal: the first request retries.
        if self.connect_eagerly && self.link.ensure_connected().is_err() {
            debug!("initial connect failed; will retry on first request");
        }

        while let Some(request) = self.shared.next_request() {
            debug!(
                request = %request.id,
                endpoint = request.endpoint.as_str(),
                reconnect = !self.link.is_connected(),
                "exchange starting"
            );

            let shared = &self.shared;
            let outcome = self.link.exchange(
                &request.to_message(),
                || shared.is_closed(),
                || shared.mark_awaiting_reply(),
            );

            match &outcome {
                Ok(reply) => {
                    debug!(request = %request.id, bytes = reply.len(), "exchange complete")
                }
                Err(err) => warn!(
                    request = %request.id,
                    endpoint = request.endpoint.as_str(),
                    kind = err.kind(),
                    error = %err,
                    "request failed"
                ),
            }

            self.shared.publish(request.id, outcome);
        }

        self.link.close();
        info!("request worker stopped");
    }
}

/// Closes the channel if the worker unwinds, so no caller polls `Pending`
/// forever.
struct AbandonOnPanic(Arc<Shared>);

impl Drop for AbandonOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("request worker panicked; closing channel");
            self.0.abandon();
        }
    }
}
