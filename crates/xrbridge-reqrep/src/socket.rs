use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};
use xrbridge_frame::Message;

use crate::error::{ReqRepError, Result};
use crate::traits::Transport;

/// Where a request socket is in its send/receive alternation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing outstanding; a send is allowed.
    Ready,
    /// A request went out; exactly one receive is allowed.
    AwaitingReply,
    /// A failure mid-exchange; only dropping the socket is allowed.
    Broken,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Ready => "ready",
            Phase::AwaitingReply => "awaiting reply",
            Phase::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// A transport wrapped in the strict send → receive → send alternation.
///
/// Any transport failure moves the socket to [`Phase::Broken`]; from then on
/// every call fails with [`ReqRepError::Broken`] and the owner must drop it
/// and connect a new one.
pub struct ReqSocket<T> {
    transport: T,
    phase: Phase,
}

impl<T: Transport> ReqSocket<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            phase: Phase::Ready,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Send a request. Only valid in [`Phase::Ready`].
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.expect_phase(Phase::Ready, "send")?;
        if message.is_empty() {
            return Err(ReqRepError::Protocol("request has no parts".to_string()));
        }

        match self.transport.send(message) {
            Ok(()) => {
                self.phase = Phase::AwaitingReply;
                Ok(())
            }
            Err(err) => {
                self.phase = Phase::Broken;
                Err(err)
            }
        }
    }

    /// Wait up to `slice` for the reply. Only valid in
    /// [`Phase::AwaitingReply`].
    ///
    /// Returns `Ok(None)` if nothing complete arrived in the slice; the
    /// socket stays in `AwaitingReply`.
    pub fn recv(&mut self, slice: Duration) -> Result<Option<Bytes>> {
        self.expect_phase(Phase::AwaitingReply, "receive")?;

        let message = match self.transport.recv(slice) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.phase = Phase::Broken;
                return Err(err);
            }
        };

        if message.len() != 1 {
            self.phase = Phase::Broken;
            return Err(ReqRepError::Protocol(format!(
                "expected single-part reply, got {} parts",
                message.len()
            )));
        }

        self.phase = Phase::Ready;
        Ok(message.into_parts().pop())
    }

    /// Receive in slices until the reply arrives, `timeout` elapses, or
    /// `cancelled` returns true between slices.
    ///
    /// Timeout and cancellation leave the socket broken: the reply may still
    /// arrive later and would be taken for the answer to the next request.
    /// A `timeout` too large to represent as a deadline never expires.
    pub fn await_reply(
        &mut self,
        timeout: Duration,
        slice: Duration,
        mut cancelled: impl FnMut() -> bool,
    ) -> Result<Bytes> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if cancelled() {
                self.phase = Phase::Broken;
                return Err(ReqRepError::Cancelled);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.phase = Phase::Broken;
                        return Err(ReqRepError::Timeout(timeout));
                    }
                    slice.min(deadline - now)
                }
                None => slice,
            };
            if let Some(reply) = self.recv(wait)? {
                debug!(bytes = reply.len(), "reply received");
                return Ok(reply);
            }
            trace!("no reply yet");
        }
    }

    /// Close the transport and consume the socket.
    pub fn close(mut self) {
        self.transport.close();
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    fn expect_phase(&self, expected: Phase, operation: &'static str) -> Result<()> {
        if self.phase == expected {
            return Ok(());
        }
        if self.phase == Phase::Broken {
            return Err(ReqRepError::Broken);
        }
        Err(ReqRepError::OutOfSequence {
            operation,
            phase: self.phase,
        })
    }
}

impl<T> fmt::Debug for ReqSocket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqSocket")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
