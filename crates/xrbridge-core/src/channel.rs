use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};
use xrbridge_frame::Message;
use xrbridge_reqrep::{Connector, Endpoint};

use crate::config::{BusyPolicy, ChannelConfig};
use crate::error::{BridgeError, RequestError, SubmitError};
use crate::worker::Worker;

/// Lifecycle of the single request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No request outstanding.
    Idle,
    /// Submitted; the worker is connecting or writing it.
    Sending,
    /// Written; the worker is waiting for the reply.
    AwaitingReply,
    /// Shut down. Terminal.
    Closed,
}

/// Monotonic id assigned to each accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One submitted request. Immutable once accepted.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub endpoint: Endpoint,
    pub payload: Option<Bytes>,
}

impl Request {
    /// Wire form: endpoint part, then the payload part if present.
    pub fn to_message(&self) -> Message {
        let message = Message::single(self.endpoint.to_bytes());
        match &self.payload {
            Some(payload) => message.with_part(payload.clone()),
            None => message,
        }
    }
}

/// Answer to [`RequestChannel::poll`].
#[derive(Debug)]
pub enum Poll {
    /// Nothing submitted, or the last result was already consumed.
    Idle,
    /// A request is outstanding.
    Pending,
    /// The outstanding request finished. Handed out exactly once.
    Ready(Result<Bytes, RequestError>),
}

impl Poll {
    pub fn is_pending(&self) -> bool {
        matches!(self, Poll::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Poll::Ready(_))
    }
}

pub(crate) struct Slot {
    state: ChannelState,
    request: Option<Request>,
    in_flight: Option<RequestId>,
    result: Option<Result<Bytes, RequestError>>,
    next_id: u64,
}

impl Slot {
    /// Free means idle with nothing left for the caller to consume.
    fn is_free(&self) -> bool {
        self.state == ChannelState::Idle && self.result.is_none()
    }
}

/// State shared between the caller and the worker thread.
///
/// The lock is never held across I/O, so callers only ever wait for another
/// short critical section.
pub(crate) struct Shared {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: ChannelState::Idle,
                request: None,
                in_flight: None,
                result: None,
                next_id: 1,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a request is submitted. `None` once closed.
    pub(crate) fn next_request(&self) -> Option<Request> {
        let mut slot = self.lock();
        loop {
            if slot.state == ChannelState::Closed {
                return None;
            }
            if let Some(request) = slot.request.take() {
                slot.in_flight = Some(request.id);
                return Some(request);
            }
            slot = self
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// The request is fully written.
    pub(crate) fn mark_awaiting_reply(&self) {
        let mut slot = self.lock();
        if slot.state == ChannelState::Sending {
            slot.state = ChannelState::AwaitingReply;
            self.changed.notify_all();
        }
    }

    /// Store the outcome of the in-flight request and free the slot.
    pub(crate) fn publish(&self, id: RequestId, outcome: Result<Bytes, RequestError>) {
        let mut slot = self.lock();
        if slot.in_flight != Some(id) {
            warn!(request = %id, "dropping result for request that is no longer in flight");
            return;
        }
        slot.in_flight = None;
        slot.result = Some(outcome);
        if slot.state != ChannelState::Closed {
            slot.state = ChannelState::Idle;
        }
        self.changed.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().state == ChannelState::Closed
    }

    /// The worker is gone without publishing: fail whatever it held and
    /// close the channel so callers get a terminal answer.
    pub(crate) fn abandon(&self) {
        let mut slot = self.lock();
        let in_flight = slot.in_flight.take();
        let queued = slot.request.take();
        if in_flight.is_some() || queued.is_some() {
            slot.result = Some(Err(RequestError::WorkerFailed));
        }
        slot.state = ChannelState::Closed;
        self.changed.notify_all();
    }

    fn close(&self) -> bool {
        let mut slot = self.lock();
        if slot.state == ChannelState::Closed {
            return false;
        }
        slot.state = ChannelState::Closed;
        // Never picked up by the worker: answer it here.
        if slot.request.take().is_some() {
            slot.result = Some(Err(RequestError::ShutdownAbort));
        }
        self.changed.notify_all();
        true
    }
}

/// Single-slot mailbox between a polling caller and the request worker.
///
/// At most one request is outstanding at any time, and its result must be
/// consumed through [`poll`](RequestChannel::poll) before the next submit is
/// accepted. Results therefore arrive in submission order, exactly once.
pub struct RequestChannel {
    shared: Arc<Shared>,
    busy_policy: BusyPolicy,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RequestChannel {
    /// Start the worker thread that owns connections made by `connector`.
    pub fn spawn<C>(connector: C, config: ChannelConfig) -> Result<Self, BridgeError>
    where
        C: Connector + 'static,
    {
        let shared = Arc::new(Shared::new());
        let busy_policy = config.busy_policy;
        let worker = Worker::new(connector, shared.clone(), config);
        let handle = std::thread::Builder::new()
            .name("xrbridge-request".to_string())
            .spawn(move || worker.run())
            .map_err(|source| BridgeError::Spawn {
                name: "request worker",
                source,
            })?;

        Ok(Self {
            shared,
            busy_policy,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Hand a request to the worker.
    ///
    /// Refused with [`SubmitError::Busy`] while another request is in flight
    /// or its result is unconsumed (after waiting, under
    /// [`BusyPolicy::Wait`]). Never queues.
    pub fn submit(
        &self,
        endpoint: impl Into<Endpoint>,
        payload: Option<Bytes>,
    ) -> Result<RequestId, SubmitError> {
        let mut slot = self.shared.lock();

        if let BusyPolicy::Wait(bound) = self.busy_policy {
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout_while(slot, bound, |slot| {
                    slot.state != ChannelState::Closed && !slot.is_free()
                })
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }

        if slot.state == ChannelState::Closed {
            return Err(SubmitError::Closed);
        }
        if !slot.is_free() {
            return Err(SubmitError::Busy);
        }

        let id = RequestId(slot.next_id);
        slot.next_id += 1;
        let request = Request {
            id,
            endpoint: endpoint.into(),
            payload,
        };
        debug!(
            request = %id,
            endpoint = request.endpoint.as_str(),
            name = request.endpoint.name(),
            bytes = request.payload.as_ref().map_or(0, Bytes::len),
            "request submitted"
        );
        slot.request = Some(request);
        slot.state = ChannelState::Sending;
        self.shared.changed.notify_all();
        Ok(id)
    }

    /// Check for a result without blocking.
    ///
    /// After shutdown, once any final result has been handed out, every call
    /// returns `Ready(Err(RequestError::Closed))`.
    pub fn poll(&self) -> Poll {
        let mut slot = self.shared.lock();
        Self::poll_locked(&mut slot, &self.shared.changed)
    }

    /// Block up to `timeout` for a result. For callers without a frame loop.
    ///
    /// A `timeout` too large to represent as a deadline waits until the
    /// result arrives.
    pub fn wait(&self, timeout: Duration) -> Poll {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.shared.lock();
        while slot.result.is_none()
            && matches!(
                slot.state,
                ChannelState::Sending | ChannelState::AwaitingReply
            )
        {
            slot = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.shared
                        .changed
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .changed
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        Self::poll_locked(&mut slot, &self.shared.changed)
    }

    fn poll_locked(slot: &mut Slot, changed: &Condvar) -> Poll {
        if let Some(result) = slot.result.take() {
            // Wakes submitters waiting under BusyPolicy::Wait.
            changed.notify_all();
            return Poll::Ready(result);
        }
        match slot.state {
            ChannelState::Idle => Poll::Idle,
            ChannelState::Sending | ChannelState::AwaitingReply => Poll::Pending,
            ChannelState::Closed => Poll::Ready(Err(RequestError::Closed)),
        }
    }

    /// Current slot state.
    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    /// Close the channel and join the worker.
    ///
    /// An in-flight request is abandoned within one receive slice and
    /// reported as [`RequestError::ShutdownAbort`]. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.close() {
            info!("request channel shutting down");
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("request worker panicked");
            }
        }
    }

    /// Whether the worker thread has exited.
    pub fn is_worker_finished(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("state", &self.state())
            .field("busy_policy", &self.busy_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use xrbridge_reqrep::endpoint::{COMPUTE, LIMITS, POSES};

    use super::*;
    use crate::mock::{wait_until, Behavior, MockBackend};

    fn fast_config() -> ChannelConfig {
        ChannelConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_reply_timeout(Duration::from_secs(5))
    }

    fn poll_until_ready(channel: &RequestChannel) -> Result<Bytes, RequestError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match channel.poll() {
                Poll::Ready(result) => return result,
                _ => {
                    assert!(Instant::now() < deadline, "no result within bound");
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    #[test]
    fn round_trip_delivers_reply_exactly_once() {
        let backend = MockBackend::new().then(Behavior::Reply(Bytes::from_static(b"B")));
        let channel = RequestChannel::spawn(backend.connector(), fast_config()).unwrap();

        assert!(matches!(channel.poll(), Poll::Idle));
        channel.submit(LIMITS, None).unwrap();

        let reply = poll_until_ready(&channel).unwrap();
        assert_eq!(reply.as_ref(), b"B");
        assert!(matches!(channel.poll(), Poll::Idle));
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(backend.sent(), vec![Message::single("L")]);
    }

    #[test]
    fn submit_while_in_flight_is_busy() {
        let backend = MockBackend::new().then(Behavior::Silent);
        let channel = RequestChannel::spawn(backend.connector(), fast_config()).unwrap();

        channel.submit(POSES, Some(Bytes::from_static(b"{}"))).unwrap();
        assert_eq!(channel.submit(LIMITS, None), Err(SubmitError::Busy));
        assert!(channel.poll().is_pending());

        channel.shutdown();
        assert_eq!(backend.sent().len(), 1);
    }

    #[test]
    fn unconsumed_result_keeps_slot_busy() {
        let backend = MockBackend::new();
        let channel = RequestChannel::spawn(backend.connector(), fast_config()).unwrap();

        channel.submit(LIMITS, None).unwrap();
        wait_until("result published", || channel.state() == ChannelState::Idle);

        assert_eq!(channel.submit(LIMITS, None), Err(SubmitError::Busy));
        assert!(channel.poll().is_ready());
        assert!(channel.submit(LIMITS, None).is_ok());
    }

    #[test]
    fn results_follow_submission_order() {
        let backend = MockBackend::new();
        let channel = RequestChannel::spawn(backend.connector(), fast_config()).unwrap();

        for i in 0..5u8 {
            let payload = Bytes::from(vec![b'0' + i]);
            let id = channel.submit(COMPUTE, Some(payload.clone())).unwrap();
            assert_eq!(id, RequestId(u64::from(i) + 1));
            assert_eq!(poll_until_ready(&channel).unwrap(), payload);
        }

        assert_eq!(backend.sent().len(), 5);
        assert_eq!(backend.max_in_flight(), 1);
    }

    #[test]
    fn hammering_submit_never_puts_two_requests_in_flight() {
        let backend = MockBackend::new();
        let channel = Arc::new(RequestChannel::spawn(backend.connector(), fast_config()).unwrap());

        let submitter = {
            let channel = channel.clone();
            thread::spawn(move || {
                let mut accepted = 0usize;
                while accepted < 20 {
                    if channel.submit(COMPUTE, Some(Bytes::from_static(b"x"))).is_ok() {
                        accepted += 1;
                    }
                }
                accepted
            })
        };

        let mut delivered = 0usize;
        while delivered < 20 {
            if let Poll::Ready(result) = channel.poll() {
                result.unwrap();
                delivered += 1;
            }
        }

        assert_eq!(submitter.join().unwrap(), 20);
        assert_eq!(backend.sent().len(), 20);
        assert_eq!(backend.max_in_flight(), 1);
    }

    #[test]
    fn timeout_fails_request_and_next_submit_reconnects() {
        let backend = MockBackend::new()
            .then(Behavior::Silent)
            .then(Behavior::Reply(Bytes::from_static(b"poses")));
        let config = fast_config().with_reply_timeout(Duration::from_millis(100));
        let channel = RequestChannel::spawn(backend.connector(), config).unwrap();

        let payload = Some(Bytes::from_static(b"{\"voxel\":[1,2,3]}"));
        channel.submit(POSES, payload.clone()).unwrap();
        match channel.wait(Duration::from_secs(5)) {
            Poll::Ready(Err(RequestError::Timeout(bound))) => {
                assert_eq!(bound, Duration::from_millis(100))
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        channel.submit(POSES, payload).unwrap();
        match channel.wait(Duration::from_secs(5)) {
            Poll::Ready(Ok(reply)) => assert_eq!(reply.as_ref(), b"poses"),
            other => panic!("expected reply, got {other:?}"),
        }

        assert_eq!(backend.connects(), 2);
        let conns: Vec<usize> = backend.sent_on().into_iter().map(|(c, _)| c).collect();
        assert_eq!(conns, vec![1, 2]);
    }

    #[test]
    fn shutdown_abandons_in_flight_request_promptly() {
        let backend = MockBackend::new().then(Behavior::Silent);
        let config = fast_config()
            .with_reply_timeout(Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(10));
        let channel = RequestChannel::spawn(backend.connector(), config).unwrap();

        channel.submit(POSES, Some(Bytes::from_static(b"{}"))).unwrap();
        wait_until("request written", || {
            channel.state() == ChannelState::AwaitingReply
        });

        let started = Instant::now();
        channel.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(channel.is_worker_finished());

        assert!(matches!(
            channel.poll(),
            Poll::Ready(Err(RequestError::ShutdownAbort))
        ));
        assert!(matches!(channel.poll(), Poll::Ready(Err(RequestError::Closed))));
        assert!(matches!(channel.poll(), Poll::Ready(Err(RequestError::Closed))));
        assert_eq!(channel.submit(LIMITS, None), Err(SubmitError::Closed));
    }

    #[test]
    fn unbounded_reply_timeout_keeps_worker_alive() {
        let backend = MockBackend::new().then(Behavior::Silent);
        let config = fast_config().with_reply_timeout(Duration::MAX);
        let channel = RequestChannel::spawn(backend.connector(), config).unwrap();

        channel.submit(POSES, None).unwrap();
        wait_until("request written", || {
            channel.state() == ChannelState::AwaitingReply
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!channel.is_worker_finished());
        assert!(channel.poll().is_pending());

        channel.shutdown();
        assert!(matches!(
            channel.poll(),
            Poll::Ready(Err(RequestError::ShutdownAbort))
        ));
    }

    #[test]
    fn unbounded_reply_timeout_and_wait_deliver_reply() {
        let backend = MockBackend::new().then(Behavior::Reply(Bytes::from_static(b"poses")));
        let config = fast_config().with_reply_timeout(Duration::MAX);
        let channel = RequestChannel::spawn(backend.connector(), config).unwrap();

        channel.submit(POSES, None).unwrap();
        match channel.wait(Duration::MAX) {
            Poll::Ready(Ok(reply)) => assert_eq!(reply.as_ref(), b"poses"),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn worker_panic_closes_channel_with_terminal_error() {
        let backend = MockBackend::new().panic_on_connect();
        let config = fast_config().with_connect_eagerly(false);
        let channel = RequestChannel::spawn(backend.connector(), config).unwrap();

        channel.submit(LIMITS, None).unwrap();
        let err = poll_until_ready(&channel).unwrap_err();
        assert!(matches!(err, RequestError::WorkerFailed));
        assert_eq!(err.kind(), "worker-failed");

        wait_until("worker exit", || channel.is_worker_finished());
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(channel.poll(), Poll::Ready(Err(RequestError::Closed))));
        assert_eq!(channel.submit(LIMITS, None), Err(SubmitError::Closed));
        channel.shutdown();
    }

    #[test]
    fn send_failure_forces_fresh_connection() {
        let backend = MockBackend::new()
            .then(Behavior::FailSend)
            .then(Behavior::Reply(Bytes::from_static(b"healthy")));
        let channel = RequestChannel::spawn(backend.connector(), fast_config()).unwrap();

        channel.submit(COMPUTE, Some(Bytes::from_static(b"{}"))).unwrap();
        assert!(matches!(
            poll_until_ready(&channel),
            Err(RequestError::Desync(_))
        ));

        channel.submit(COMPUTE, Some(Bytes::from_static(b"{}"))).unwrap();
        assert_eq!(poll_until_ready(&channel).unwrap().as_ref(), b"healthy");

        assert_eq!(backend.connects(), 2);
        assert_eq!(backend.reuse_after_failure(), 0);
        assert_eq!(backend.sent_on().last().map(|(c, _)| *c), Some(2));
    }

    #[test]
    fn connect_failure_is_reported_and_retried_on_next_submit() {
        // Eager connect and the first request both hit a refused connection.
        let backend = MockBackend::new().fail_connects(2);
        let channel = RequestChannel::spawn(backend.connector(), fast_config()).unwrap();

        channel.submit(LIMITS, None).unwrap();
        let err = poll_until_ready(&channel).unwrap_err();
        assert!(matches!(err, RequestError::Connection { .. }));
        assert_eq!(err.kind(), "connection");

        channel.submit(LIMITS, None).unwrap();
        assert_eq!(poll_until_ready(&channel).unwrap().as_ref(), b"L");
        assert_eq!(backend.connects(), 1);
    }

    #[test]
    fn wait_policy_blocks_until_result_consumed() {
        let backend = MockBackend::new()
            .then(Behavior::Reply(Bytes::from_static(b"a")))
            .then(Behavior::Reply(Bytes::from_static(b"b")));
        let config = fast_config().with_busy_policy(BusyPolicy::Wait(Duration::from_secs(5)));
        let channel = Arc::new(RequestChannel::spawn(backend.connector(), config).unwrap());

        channel.submit(LIMITS, None).unwrap();

        let consumer = {
            let channel = channel.clone();
            thread::spawn(move || poll_until_ready(&channel))
        };

        channel.submit(LIMITS, None).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap().as_ref(), b"a");
        assert_eq!(poll_until_ready(&channel).unwrap().as_ref(), b"b");
    }

    #[test]
    fn wait_policy_gives_up_after_bound() {
        let backend = MockBackend::new().then(Behavior::Silent);
        let config =
            fast_config().with_busy_policy(BusyPolicy::Wait(Duration::from_millis(50)));
        let channel = RequestChannel::spawn(backend.connector(), config).unwrap();

        channel.submit(POSES, None).unwrap();
        let started = Instant::now();
        assert_eq!(channel.submit(POSES, None), Err(SubmitError::Busy));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn shutdown_is_idempotent_and_drop_joins_worker() {
        let backend = MockBackend::new();
        let channel = RequestChannel::spawn(backend.connector(), fast_config()).unwrap();
        channel.shutdown();
        channel.shutdown();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(channel.poll(), Poll::Ready(Err(RequestError::Closed))));
        drop(channel);
    }

    #[test]
    fn request_wire_form_omits_missing_payload() {
        let bare = Request {
            id: RequestId(1),
            endpoint: Endpoint::from(LIMITS),
            payload: None,
        };
        assert_eq!(bare.to_message(), Message::single("L"));

        let with_payload = Request {
            payload: Some(Bytes::from_static(b"{}")),
            ..bare
        };
        assert_eq!(with_payload.to_message(), Message::single("L").with_part("{}"));
    }
}
