//! # duelsync-client
//!
//! Match client for duelsync.
//!
//! This is the crate applications use to take part in a match. It performs
//! the I/O that the pure state machines of `duelsync-core` ask for.
//!
//! ## Features
//!
//! - **Single event loop**: commands, frames and timers are handled one at a time
//! - **Session management**: subscription, presence, ack tracking, reconnects
//! - **Transport abstraction**: pluggable broadcast channel (loopback, mock)
//! - **TOML configuration**: every timing and rule has a default
//!
//! ## Example
//!
//! ```ignore
//! use duelsync_client::{LoopbackHub, MatchClient, MatchConfig};
//!
//! let hub = LoopbackHub::new();
//! let client = MatchClient::new(MatchConfig::default(), hub.transport(), "alice".into(), state, registry)?;
//! let handle = client.spawn();
//!
//! let state = handle.act(ActionPayload::DrawCard).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod session;
pub mod transport;

pub use client::{ClientError, ClientEvent, ClientStatus, MatchClient, MatchHandle};
pub use config::{ConfigError, MatchConfig};
pub use session::{Delivery, PeerInfo, SessionConfig, SessionError, SessionManager, SessionOutput};
pub use transport::{LoopbackHub, LoopbackTransport, MockTransport, Transport, TransportError};
