//! Transport abstraction for duelsync.
//!
//! A transport is a broadcast channel: every frame sent on a room channel
//! reaches every subscriber of that channel, the sender included. Filtering
//! our own frames is the session's job, not the transport's.
//!
//! # Design
//!
//! The transport trait is async and subscription-oriented:
//! - `connect()` subscribes to a named channel
//! - `send()` broadcasts encoded envelope bytes
//! - `recv()` waits for the next frame
//! - `close()` leaves the channel
//!
//! # Example
//!
//! ```ignore
//! let hub = LoopbackHub::new();
//! let transport = hub.transport();
//! transport.connect("match:room-1").await?;
//! transport.send(&envelope.to_bytes()?).await?;
//! let frame = transport.recv().await?;
//! ```

mod loopback;
mod mock;

pub use loopback::{LoopbackHub, LoopbackTransport};
pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Subscription failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not subscribed.
    #[error("not connected")]
    NotConnected,

    /// Link to the backend dropped.
    #[error("connection closed")]
    ConnectionClosed,

    /// The backend closed the channel itself.
    #[error("channel closed by the backend")]
    ChannelClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Subscription timed out.
    #[error("connection timeout")]
    Timeout,
}

/// Broadcast channel carrying encoded envelopes.
///
/// Implementations must be safe to share between the match event loop and
/// the reader task, hence `&self` everywhere.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to the named channel.
    async fn connect(&self, channel: &str) -> Result<(), TransportError>;

    /// Broadcast bytes to every subscriber of the channel.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Blocks until a frame is available or the subscription ends.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently subscribed.
    fn is_connected(&self) -> bool;

    /// Leave the channel.
    async fn close(&self) -> Result<(), TransportError>;
}
