//! # duelsync-types
//!
//! Match model and wire format types for the duelsync card battle core.
//!
//! This crate provides the data shared by every other duelsync crate:
//! - [`MatchState`], [`PlayerState`], [`CardInstance`] - the match model
//! - [`Action`], [`ActionPayload`] - what players do
//! - [`SyncMessage`], [`StateDiff`] - synchronizer traffic
//! - [`Envelope`], [`Payload`] - the broadcast wire format
//! - [`ProtocolError`] - codec errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod action;
mod envelope;
mod error;
mod ids;
mod messages;
mod model;

pub use action::{Action, ActionKind, ActionPayload};
pub use envelope::{unix_millis, Envelope, MessageType, Payload};
pub use error::ProtocolError;
pub use ids::{ActionId, CardId, ConflictId, FighterId, MessageId, PlayerId, RoomId, Seat, StateHash};
pub use messages::{
    Ack, ConflictDetected, ConflictResolution, ErrorReport, FullState, GameEvent, HashMismatch,
    Heartbeat, MismatchSeverity, Presence, PresenceStatus, Reconnect, ResolutionType, StateDiff,
    StateDiffMessage, SyncMessage, SyncMode, SyncPing, SyncPong, SyncRequest,
};
pub use model::{
    CardInstance, CardOverlay, FighterTemplate, LogEntry, LogEvent, MatchState, Phase,
    PlayerState, Rarity, WinReason, Zone,
};
