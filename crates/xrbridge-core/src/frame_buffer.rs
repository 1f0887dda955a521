use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

struct BufferSlot {
    frame: Option<Bytes>,
    closed: bool,
}

/// One-slot, overwrite-on-write frame holder.
///
/// The producer never waits for the consumer: a new frame replaces any
/// frame not yet taken, which is then never sent.
pub struct FrameBuffer {
    slot: Mutex<BufferSlot>,
    changed: Condvar,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(BufferSlot {
                frame: None,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `frame`, replacing any unsent one.
    ///
    /// Returns true if an unsent frame was discarded. Ignored once closed.
    pub fn set(&self, frame: Bytes) -> bool {
        let mut slot = self.lock();
        if slot.closed {
            return false;
        }
        let replaced = slot.frame.replace(frame).is_some();
        self.changed.notify_one();
        replaced
    }

    /// Take the pending frame without waiting.
    pub fn take(&self) -> Option<Bytes> {
        self.lock().frame.take()
    }

    /// Block until a frame is available. `None` once closed.
    pub fn wait_take(&self) -> Option<Bytes> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return None;
            }
            if let Some(frame) = slot.frame.take() {
                return Some(frame);
            }
            slot = self
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether a frame is waiting to be taken.
    pub fn has_pending(&self) -> bool {
        self.lock().frame.is_some()
    }

    /// Drop any pending frame and wake the consumer for good.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.frame = None;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
