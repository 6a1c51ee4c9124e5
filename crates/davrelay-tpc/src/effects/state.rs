use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::http::ConnectionObserver;
use crate::core::Outcome;

/// Byte counter and peer of one stream.
#[derive(Debug, Default)]
pub struct StreamProgress {
    bytes: Arc<AtomicU64>,
    connection: Mutex<Option<String>>,
    ipv6: AtomicBool,
}

impl StreamProgress {
    pub fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Handle on the byte counter for code that outlives a borrow of the
    /// progress, such as a request body owned by the HTTP client.
    pub fn byte_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes)
    }

    /// `tcp:<ip>:<port>` of the current remote peer.
    pub fn connection(&self) -> Option<String> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConnectionObserver for StreamProgress {
    fn on_connect(&self, peer: SocketAddr) {
        self.ipv6.store(peer.is_ipv6(), Ordering::Relaxed);
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = Some(format!("tcp:{peer}"));
    }

    fn on_close(&self) {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[derive(Debug, Default)]
struct Failures {
    remote_message: Option<String>,
    local: Option<String>,
    transport: Option<String>,
}

/// Progress and failure state of one transfer.
///
/// Written by the stream tasks, read by the marker reporter and by the final
/// classification. The first failure of each kind is kept.
#[derive(Debug)]
pub struct TransferState {
    streams: Vec<StreamProgress>,
    status: AtomicU16,
    content_length: Mutex<Option<u64>>,
    failures: Mutex<Failures>,
}

impl TransferState {
    pub fn new(streams: usize) -> Self {
        Self {
            streams: (0..streams.max(1)).map(|_| StreamProgress::default()).collect(),
            status: AtomicU16::new(0),
            content_length: Mutex::new(None),
            failures: Mutex::new(Failures::default()),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Progress of stream `index`; out-of-range indices share the last one.
    pub fn stream(&self, index: usize) -> &StreamProgress {
        let last = self.streams.len() - 1;
        &self.streams[index.min(last)]
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.streams.iter().map(StreamProgress::bytes).sum()
    }

    pub fn connections(&self) -> Vec<String> {
        self.streams.iter().filter_map(StreamProgress::connection).collect()
    }

    pub fn is_ipv6(&self) -> bool {
        self.streams.iter().any(|s| s.ipv6.load(Ordering::Relaxed))
    }

    /// Record a remote status. An error status is never replaced by a later
    /// success from another stream.
    pub fn set_status(&self, status: u16) {
        let _ = self.status.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            (current < 400).then_some(status)
        });
    }

    pub fn status(&self) -> Option<u16> {
        match self.status.load(Ordering::Relaxed) {
            0 => None,
            status => Some(status),
        }
    }

    pub fn set_content_length(&self, length: Option<u64>) {
        *self.content_length.lock().unwrap_or_else(PoisonError::into_inner) = length;
    }

    pub fn content_length(&self) -> Option<u64> {
        *self.content_length.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_failures<T>(&self, f: impl FnOnce(&mut Failures) -> T) -> T {
        f(&mut self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Error body returned with a remote error status.
    pub fn set_remote_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_failures(|f| {
            f.remote_message.get_or_insert(message);
        });
    }

    pub fn set_local_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_failures(|f| {
            f.local.get_or_insert(message);
        });
    }

    pub fn set_transport_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_failures(|f| {
            f.transport.get_or_insert(message);
        });
    }

    pub fn local_error(&self) -> Option<String> {
        self.with_failures(|f| f.local.clone())
    }

    /// Something already failed; remaining streams should stop.
    pub fn has_failed(&self) -> bool {
        self.status().is_some_and(|s| s >= 400)
            || self.with_failures(|f| f.local.is_some() || f.transport.is_some())
    }

    pub fn outcome(&self) -> Outcome {
        self.with_failures(|f| {
            Outcome::classify(
                self.status(),
                f.remote_message.as_deref(),
                f.local.as_deref(),
                f.transport.as_deref(),
            )
        })
    }
}
