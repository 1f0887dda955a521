use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use xrbridge_frame::Message;
use xrbridge_reqrep::{Connector, ReqSocket};

use crate::error::RequestError;

/// A lazily (re)connected request socket owned by one thread.
///
/// The socket is held only between successful exchanges. Any failure drops
/// it, so the next exchange always starts on a fresh connection.
pub(crate) struct Link<C: Connector> {
    connector: C,
    socket: Option<ReqSocket<C::Transport>>,
    reply_timeout: Duration,
    slice: Duration,
}

impl<C: Connector> Link<C> {
    pub(crate) fn new(connector: C, reply_timeout: Duration, slice: Duration) -> Self {
        Self {
            connector,
            socket: None,
            reply_timeout,
            slice,
        }
    }

    /// Connect now if not connected.
    pub(crate) fn ensure_connected(&mut self) -> Result<(), RequestError> {
        if self.socket.is_none() {
            self.socket = Some(self.open()?);
        }
        Ok(())
    }

    /// One send/receive pair.
    ///
    /// `cancelled` is checked before sending and between receive slices;
    /// `on_sent` runs once the request is fully written.
    pub(crate) fn exchange(
        &mut self,
        message: &Message,
        mut cancelled: impl FnMut() -> bool,
        on_sent: impl FnOnce(),
    ) -> Result<Bytes, RequestError> {
        let mut socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.open()?,
        };

        if cancelled() {
            socket.close();
            return Err(RequestError::ShutdownAbort);
        }

        if let Err(err) = socket.send(message) {
            warn!(
                backend = %self.connector.target(),
                error = %err,
                "send failed; dropping connection"
            );
            socket.close();
            return Err(RequestError::Desync(err));
        }
        on_sent();

        match socket.await_reply(self.reply_timeout, self.slice, &mut cancelled) {
            Ok(reply) => {
                self.socket = Some(socket);
                Ok(reply)
            }
            Err(err) => {
                warn!(
                    backend = %self.connector.target(),
                    error = %err,
                    "exchange failed; dropping connection"
                );
                socket.close();
                Err(RequestError::from_exchange(err))
            }
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Close the connection, if any.
    pub(crate) fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!(backend = %self.connector.target(), "closing connection");
            socket.close();
        }
    }

    fn open(&mut self) -> Result<ReqSocket<C::Transport>, RequestError> {
        let target = self.connector.target();
        match self.connector.connect() {
            Ok(transport) => Ok(ReqSocket::new(transport)),
            Err(source) => {
                warn!(backend = %target, error = %source, "connect failed");
                Err(RequestError::Connection { target, source })
            }
        }
    }
}
