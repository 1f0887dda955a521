//! In-memory backend doubles for channel and uploader tests.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use xrbridge_frame::{FrameError, Message};
use xrbridge_reqrep::{Connector, ReqRepError, Transport};
use xrbridge_transport::TransportError;

const TEST_BOUND: Duration = Duration::from_secs(5);

/// How the backend treats the next request.
pub(crate) enum Behavior {
    /// Reply with the last request part.
    Echo,
    /// Reply with fixed bytes.
    Reply(Bytes),
    /// Accept the request, never reply.
    Silent,
    /// Fail the send, leaving the connection broken.
    FailSend,
    /// Block inside send until the gate opens, then echo.
    HoldSend(Arc<Gate>),
}

pub(crate) struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            changed: Condvar::new(),
        })
    }

    pub(crate) fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }

    fn wait(&self) {
        let open = self.open.lock().unwrap();
        let (_open, _) = self
            .changed
            .wait_timeout_while(open, TEST_BOUND, |open| !*open)
            .unwrap();
    }
}

#[derive(Default)]
struct Script {
    behaviors: VecDeque<Behavior>,
    connect_failures: usize,
    connects: usize,
    sent: Vec<(usize, Message)>,
    in_flight: usize,
    max_in_flight: usize,
    reuse_after_failure: usize,
    panic_on_connect: bool,
}

/// Scripted backend shared by every connection its connectors open.
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    script: Arc<Mutex<Script>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a behavior; unscripted requests are echoed.
    pub(crate) fn then(self, behavior: Behavior) -> Self {
        self.script.lock().unwrap().behaviors.push_back(behavior);
        self
    }

    /// Refuse the next `count` connection attempts.
    pub(crate) fn fail_connects(self, count: usize) -> Self {
        self.script.lock().unwrap().connect_failures = count;
        self
    }

    /// Make every connection attempt panic, killing the calling thread.
    pub(crate) fn panic_on_connect(self) -> Self {
        self.script.lock().unwrap().panic_on_connect = true;
        self
    }

    pub(crate) fn connector(&self) -> MockConnector {
        MockConnector {
            backend: self.clone(),
        }
    }

    /// Successful connections so far.
    pub(crate) fn connects(&self) -> usize {
        self.script.lock().unwrap().connects
    }

    /// Requests received, in order.
    pub(crate) fn sent(&self) -> Vec<Message> {
        self.sent_on().into_iter().map(|(_, msg)| msg).collect()
    }

    /// Requests received, tagged with the connection number (from 1).
    pub(crate) fn sent_on(&self) -> Vec<(usize, Message)> {
        self.script.lock().unwrap().sent.clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.script.lock().unwrap().max_in_flight
    }

    /// Sends attempted on a connection after it had failed.
    pub(crate) fn reuse_after_failure(&self) -> usize {
        self.script.lock().unwrap().reuse_after_failure
    }
}

pub(crate) struct MockConnector {
    backend: MockBackend,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(&mut self) -> xrbridge_reqrep::Result<MockTransport> {
        let mut script = self.backend.script.lock().unwrap();
        if script.panic_on_connect {
            drop(script);
            panic!("mock connector told to panic");
        }
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(ReqRepError::Transport(TransportError::Connect {
                addr: "mock".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            }));
        }
        script.connects += 1;
        Ok(MockTransport {
            conn: script.connects,
            backend: self.backend.clone(),
            pending: None,
            broken: false,
        })
    }

    fn target(&self) -> String {
        "mock".to_string()
    }
}

enum Pending {
    Now(Bytes),
    Never,
}

pub(crate) struct MockTransport {
    conn: usize,
    backend: MockBackend,
    pending: Option<Pending>,
    broken: bool,
}

impl Transport for MockTransport {
    fn send(&mut self, message: &Message) -> xrbridge_reqrep::Result<()> {
        let behavior = {
            let mut script = self.backend.script.lock().unwrap();
            if self.broken {
                script.reuse_after_failure += 1;
                return Err(ReqRepError::Disconnected);
            }
            script.behaviors.pop_front().unwrap_or(Behavior::Echo)
        };

        let last_part = || message.parts().last().cloned().unwrap_or_default();
        let pending = match behavior {
            Behavior::Echo => Pending::Now(last_part()),
            Behavior::Reply(bytes) => Pending::Now(bytes),
            Behavior::Silent => Pending::Never,
            Behavior::FailSend => {
                self.broken = true;
                return Err(ReqRepError::Frame(FrameError::Io(std::io::Error::from(
                    std::io::ErrorKind::BrokenPipe,
                ))));
            }
            Behavior::HoldSend(gate) => {
                gate.wait();
                Pending::Now(last_part())
            }
        };

        let mut script = self.backend.script.lock().unwrap();
        script.sent.push((self.conn, message.clone()));
        script.in_flight += 1;
        script.max_in_flight = script.max_in_flight.max(script.in_flight);
        self.pending = Some(pending);
        Ok(())
    }

    fn recv(&mut self, slice: Duration) -> xrbridge_reqrep::Result<Option<Message>> {
        match self.pending.take() {
            Some(Pending::Now(reply)) => {
                self.backend.script.lock().unwrap().in_flight -= 1;
                Ok(Some(Message::single(reply)))
            }
            Some(Pending::Never) => {
                self.pending = Some(Pending::Never);
                std::thread::sleep(slice);
                Ok(None)
            }
            None => Err(ReqRepError::Protocol("recv without request".to_string())),
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.pending.take().is_some() {
            self.backend.script.lock().unwrap().in_flight -= 1;
        }
    }
}

/// Spin (with sleeps) until `condition` holds; panics after a few seconds.
pub(crate) fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_BOUND;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
