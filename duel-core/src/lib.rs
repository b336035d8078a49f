//! # duelsync-core
//!
//! Pure logic for duelsync (no I/O, instant tests).
//!
//! This crate implements the rules, hashing and synchronization protocol of
//! a two-player card battle without any network or timer I/O:
//! - [`RulesEngine`] validates and applies actions
//! - [`hash`] computes the canonical state hash
//! - [`diff`] generates and applies incremental repairs
//! - [`LocalStore`] owns the local state, history and pending actions
//! - [`Synchronizer`] detects divergence and drives the repair protocols
//! - [`ConnectionState`] and [`OutboundQueue`] model the session
//!
//! Every input carries the current time explicitly. The actual I/O is
//! performed by `duelsync-client`, which executes the commands these
//! state machines return.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod conflict;
pub mod connection;
pub mod diff;
pub mod error;
pub mod hash;
pub mod registry;
pub mod rules;
pub mod sample;
pub mod setup;
pub mod store;
pub mod sync;

pub use buffer::{BufferError, OutboundQueue};
pub use conflict::{Conflict, ConflictDetector, Severity};
pub use connection::{ConnectionEvent, ConnectionInput, ConnectionState, ReconnectPolicy, SessionCommand};
pub use error::{StoreError, SyncError};
pub use registry::{summon_cost, FighterRegistry, StaticRegistry, MAX_COST};
pub use rules::{Rejection, RulesConfig, RulesEngine};
pub use setup::{MatchSetup, SeatEntry, SetupError};
pub use store::{LocalStore, RemoteOutcome, StoreSnapshot, DEFAULT_HISTORY_CAPACITY};
pub use sync::{HashPair, RemoteReport, Repair, Role, SyncCommand, SyncConfig, Synchronizer};
