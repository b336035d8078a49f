//! Mock transport for testing.
//!
//! Records every broadcast frame and replays queued frames, with hooks to
//! make the next subscribe, send or receive fail.

use super::{Transport, TransportError};
use async_trait::async_trait;
use duelsync_types::Envelope;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the session
/// under test owns another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    channel: Option<String>,
    connect_calls: u32,
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    failing_connects: Vec<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame to be returned by a later `recv()` call.
    pub fn queue_frame(&self, data: Vec<u8>) {
        self.inner().inbound.push_back(data);
    }

    /// Encode and queue an envelope.
    pub fn queue_envelope(&self, envelope: &Envelope) {
        if let Ok(bytes) = envelope.to_bytes() {
            self.queue_frame(bytes);
        }
    }

    /// Every frame broadcast so far.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner().sent.clone()
    }

    /// Every broadcast frame that decodes as an envelope.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.inner()
            .sent
            .iter()
            .filter_map(|frame| Envelope::from_bytes(frame).ok())
            .collect()
    }

    /// The last envelope broadcast.
    pub fn last_envelope(&self) -> Option<Envelope> {
        self.sent_envelopes().pop()
    }

    /// Forget recorded frames.
    pub fn clear_sent(&self) {
        self.inner().sent.clear();
    }

    /// Channel currently subscribed to.
    pub fn channel(&self) -> Option<String> {
        self.inner().channel.clone()
    }

    /// How many times `connect()` was called.
    pub fn connect_calls(&self) -> u32 {
        self.inner().connect_calls
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.fail_connects(1, error);
    }

    /// Cause the next `count` connect() calls to fail.
    pub fn fail_connects(&self, count: usize, error: &str) {
        let mut inner = self.inner();
        inner
            .failing_connects
            .extend(std::iter::repeat(error.to_string()).take(count));
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.inner().fail_next_recv = Some(error.to_string());
    }

    /// Drop the subscription as if the network went away.
    pub fn drop_link(&self) {
        self.inner().connected = false;
    }

    /// Clear all state (frames, queue, subscription).
    pub fn reset(&self) {
        *self.inner() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, channel: &str) -> Result<(), TransportError> {
        let mut inner = self.inner();
        inner.connect_calls += 1;

        if !inner.failing_connects.is_empty() {
            let error = inner.failing_connects.remove(0);
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.channel = Some(channel.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_recv.take() {
            return Err(TransportError::ReceiveFailed(error));
        }

        inner
            .inbound
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.inner().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner();
        inner.connected = false;
        inner.channel = None;
        Ok(())
    }
}
