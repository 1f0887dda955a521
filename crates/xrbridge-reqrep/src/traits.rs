use std::time::Duration;

use xrbridge_frame::Message;

use crate::error::Result;

/// A connected request/reply transport.
///
/// Implementations move bytes only; ordering is enforced by
/// [`ReqSocket`](crate::ReqSocket). A transport is owned by exactly one
/// thread, hence `Send` but not `Sync`.
pub trait Transport: Send {
    /// Write every part of `message`.
    fn send(&mut self, message: &Message) -> Result<()>;

    /// Wait up to `slice` for a complete reply.
    ///
    /// Returns `Ok(None)` when the slice elapsed first. Partially received
    /// data is kept for the next call.
    fn recv(&mut self, slice: Duration) -> Result<Option<Message>>;

    /// Close the connection. Dropping has the same effect.
    fn close(&mut self) {}
}

/// Establishes (and re-establishes) transports to one backend.
pub trait Connector: Send {
    type Transport: Transport;

    /// Open a fresh connection.
    fn connect(&mut self) -> Result<Self::Transport>;

    /// Target description for logs.
    fn target(&self) -> String;
}
