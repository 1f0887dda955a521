use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use xrbridge_frame::Message;
use xrbridge_reqrep::{Connector, Endpoint};

use crate::config::UploaderConfig;
use crate::error::BridgeError;
use crate::frame_buffer::FrameBuffer;
use crate::link::Link;

/// Upload counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    /// Frames the backend acknowledged.
    pub sent: u64,
    /// Frames replaced before they could be sent.
    pub overwritten: u64,
    /// Uploads that failed (connect, desync, timeout, shutdown).
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    overwritten: AtomicU64,
    failed: AtomicU64,
}

/// Best-effort pusher of the latest camera frame.
///
/// Uses its own connection, separate from the request channel's, so a
/// continuous stream can never starve interactive requests or vice versa.
pub struct StreamUploader {
    buffer: Arc<FrameBuffer>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamUploader {
    /// Start the upload thread on connections made by `connector`.
    pub fn spawn<C>(connector: C, config: UploaderConfig) -> Result<Self, BridgeError>
    where
        C: Connector + 'static,
    {
        let buffer = Arc::new(FrameBuffer::new());
        let counters = Arc::new(Counters::default());

        let task = UploadTask {
            link: Link::new(connector, config.reply_timeout, config.poll_interval),
            endpoint: config.endpoint,
            buffer: buffer.clone(),
            counters: counters.clone(),
        };
        let handle = thread::Builder::new()
            .name("xrbridge-upload".to_string())
            .spawn(move || task.run())
            .map_err(|source| BridgeError::Spawn {
                name: "stream uploader",
                source,
            })?;

        Ok(Self {
            buffer,
            counters,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Offer a new frame. Never waits for the upload thread; an unsent
    /// previous frame is discarded.
    pub fn set_frame(&self, frame: impl Into<Bytes>) {
        if self.buffer.set(frame.into()) {
            self.counters.overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> UploadStats {
        UploadStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            overwritten: self.counters.overwritten.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop uploading and join the thread. An upload in progress is
    /// abandoned within one receive slice. Idempotent.
    pub fn shutdown(&self) {
        self.buffer.close();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("stream uploader panicked");
            }
        }
    }

    /// Whether the upload thread has exited.
    pub fn is_worker_finished(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }
}

impl std::fmt::Debug for StreamUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamUploader")
            .field("stats", &self.stats())
            .field("pending", &self.buffer.has_pending())
            .finish_non_exhaustive()
    }
}

impl Drop for StreamUploader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct UploadTask<C: Connector> {
    link: Link<C>,
    endpoint: Endpoint,
    buffer: Arc<FrameBuffer>,
    counters: Arc<Counters>,
}

impl<C: Connector> UploadTask<C> {
    fn run(mut self) {
        let _guard = CloseOnPanic(self.buffer.clone());
        info!(endpoint = self.endpoint.as_str(), "stream uploader started");

        while let Some(frame) = self.buffer.wait_take() {
            let message =
                Message::single(self.endpoint.to_bytes()).with_part(BASE64.encode(&frame));
            let buffer = &self.buffer;
            match self.link.exchange(&message, || buffer.is_closed(), || {}) {
                Ok(_) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(bytes = frame.len(), "frame uploaded");
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(kind = err.kind(), error = %err, "frame upload failed");
                }
            }
        }

        self.link.close();
        info!("stream uploader stopped");
    }
}

/// Closes the frame buffer if the uploader unwinds, so producers stop feeding
/// a dead thread.
struct CloseOnPanic(Arc<FrameBuffer>);

impl Drop for CloseOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("stream uploader panicked; closing frame buffer");
            self.0.close();
        }
    }
}
