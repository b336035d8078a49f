//! Envelope - the wire format wrapper for all match traffic.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    Ack, Action, ErrorReport, GameEvent, Heartbeat, MessageId, PlayerId, Presence, ProtocolError,
    Reconnect, RoomId, SyncMessage,
};

/// Message type discriminator for envelope routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A player action
    Action,
    /// Synchronizer traffic
    StateSync,
    /// Liveness beacon
    Heartbeat,
    /// Acknowledgment of a message
    Ack,
    /// Channel presence change
    Presence,
    /// Error notification
    Error,
    /// Reconnection notice
    Reconnect,
    /// Match-level notification
    GameEvent,
}

/// The body of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// A player action.
    Action(Action),
    /// Synchronizer traffic.
    StateSync(SyncMessage),
    /// Liveness beacon.
    Heartbeat(Heartbeat),
    /// Acknowledgment.
    Ack(Ack),
    /// Presence change.
    Presence(Presence),
    /// Error notification.
    Error(ErrorReport),
    /// Reconnection notice.
    Reconnect(Reconnect),
    /// Match-level notification.
    GameEvent(GameEvent),
}

impl Payload {
    /// The discriminator matching this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Action(_) => MessageType::Action,
            Payload::StateSync(_) => MessageType::StateSync,
            Payload::Heartbeat(_) => MessageType::Heartbeat,
            Payload::Ack(_) => MessageType::Ack,
            Payload::Presence(_) => MessageType::Presence,
            Payload::Error(_) => MessageType::Error,
            Payload::Reconnect(_) => MessageType::Reconnect,
            Payload::GameEvent(_) => MessageType::GameEvent,
        }
    }
}

/// The envelope wraps every payload with routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Match room
    pub room_id: RoomId,
    /// Sender, absent for anonymous system messages
    pub player_id: Option<PlayerId>,
    /// Unix timestamp (milliseconds) - informational only, not trusted
    pub timestamp: u64,
    /// Unique id, echoed back in acknowledgments
    pub message_id: MessageId,
    /// Whether the receiver must acknowledge
    #[serde(default)]
    pub requires_ack: bool,
    /// Payload
    pub data: Payload,
}

impl Envelope {
    /// Create a new envelope for sending.
    pub fn new(room_id: RoomId, sender: Option<PlayerId>, data: Payload) -> Self {
        Self {
            msg_type: data.message_type(),
            room_id,
            player_id: sender,
            timestamp: unix_millis(),
            message_id: MessageId::new(),
            requires_ack: false,
            data,
        }
    }

    /// Mark this envelope as requiring acknowledgment.
    pub fn with_ack(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec_named(self).map_err(ProtocolError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    ///
    /// Rejects envelopes whose declared type disagrees with the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Self = rmp_serde::from_slice(bytes).map_err(ProtocolError::Deserialization)?;
        let actual = envelope.data.message_type();
        if envelope.msg_type != actual {
            return Err(ProtocolError::TypeMismatch {
                declared: envelope.msg_type,
                actual,
            });
        }
        Ok(envelope)
    }

    /// Whether this envelope was sent by the given player.
    pub fn is_from(&self, player: &PlayerId) -> bool {
        self.player_id.as_ref() == Some(player)
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
