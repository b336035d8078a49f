//! Payloads carried inside an [`Envelope`](crate::Envelope).

use serde::{Deserialize, Serialize};

use crate::{
    Action, ActionId, CardId, CardInstance, ConflictId, MatchState, MessageId, Phase, PlayerId,
    Seat, StateHash, Zone,
};

/// State synchronization messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Periodic consistency check.
    Ping(SyncPing),
    /// Answer to a consistency check.
    Pong(SyncPong),
    /// Ask the authority for a repair.
    RequestSync(SyncRequest),
    /// Wholesale replacement.
    FullState(FullState),
    /// Incremental repair.
    StateDiff(StateDiffMessage),
    /// Concurrent actions collided.
    ConflictDetected(ConflictDetected),
    /// How a collision was settled.
    ConflictResolution(ConflictResolution),
    /// A remote action was issued from a state the receiver does not have.
    HashMismatch(HashMismatch),
}

/// Periodic consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPing {
    /// Sender's current hash.
    pub local_hash: StateHash,
    /// Unix millis.
    pub timestamp: u64,
    /// Sender's turn number.
    pub turn_number: u32,
    /// Last action the sender applied.
    pub last_action_id: Option<ActionId>,
}

/// Answer to a [`SyncPing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPong {
    /// Authority's current hash.
    pub server_hash: StateHash,
    /// Unix millis.
    pub timestamp: u64,
    /// Authority's turn number.
    pub turn_number: u32,
}

/// Repair mode requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Replace everything.
    Full,
    /// Patch only what differs.
    Diff,
}

/// Request for a repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Requested repair.
    pub mode: SyncMode,
    /// Requester's turn number.
    pub turn_number: u32,
    /// Requester's hash.
    pub local_hash: StateHash,
    /// Requester's state, so a diff can be computed against it.
    pub base_state: Option<Box<MatchState>>,
}

/// Full state transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullState {
    /// Authoritative state.
    pub game_state: Box<MatchState>,
    /// Authoritative action history, oldest first.
    pub action_history: Vec<Action>,
    /// Hash of `game_state`.
    pub server_hash: StateHash,
}

/// Ordered list of patches and the hash they must produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiffMessage {
    /// Patches, applied in order.
    pub diffs: Vec<StateDiff>,
    /// Hash expected after all patches are applied.
    pub target_hash: StateHash,
}

/// One isolated, idempotent edit of a match state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateDiff {
    /// Set a player's hit points.
    PlayerHp {
        /// Target seat.
        seat: Seat,
        /// New value.
        hp: u32,
    },
    /// Set a player's energy and ceiling.
    PlayerEnergy {
        /// Target seat.
        seat: Seat,
        /// New energy.
        energy: u32,
        /// New ceiling.
        max_energy: u32,
    },
    /// Set a player's per-turn counters.
    PlayerCounters {
        /// Target seat.
        seat: Seat,
        /// Cards drawn this turn.
        cards_drawn_this_turn: u32,
        /// Actions remaining this turn.
        actions_remaining: u32,
    },
    /// Place a card in a zone, removing it from wherever it was.
    CardMoved {
        /// Owner seat.
        seat: Seat,
        /// The card as it should look after the move.
        card: CardInstance,
        /// Zone it is believed to be leaving.
        from: Option<Zone>,
        /// Zone it enters.
        to: Zone,
        /// Position inside the destination zone.
        index: usize,
    },
    /// Drop a card the target state does not have.
    CardRemoved {
        /// Owner seat.
        seat: Seat,
        /// Card to drop.
        card_id: CardId,
    },
    /// Merge overlay attributes into a card.
    CardUpdated {
        /// Owner seat.
        seat: Seat,
        /// Card to update.
        card_id: CardId,
        /// New hit points.
        current_hp: Option<u32>,
        /// New attack flag.
        can_attack: Option<bool>,
        /// New summoned flag.
        summoned_this_turn: Option<bool>,
    },
    /// Set the phase and winner.
    PhaseChange {
        /// New phase.
        phase: Phase,
        /// Winner, if finished.
        winner: Option<Seat>,
    },
    /// Set the turn number and current seat.
    TurnChange {
        /// New turn number.
        turn: u32,
        /// Seat to act.
        current: Seat,
    },
    /// Set timestamps.
    Timestamp {
        /// Last update time.
        updated_at: u64,
        /// Turn deadline.
        turn_deadline: u64,
    },
}

/// Concurrent actions touching the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetected {
    /// Conflict being reported.
    pub conflict_id: ConflictId,
    /// The receiver's colliding actions.
    pub local_actions: Vec<Action>,
    /// The authority's colliding actions.
    pub server_actions: Vec<Action>,
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    /// Adopt the authority's state.
    ServerWins,
    /// Adopt the authority's state and replay what still applies.
    Merge,
    /// Keep the client's state and resubmit its actions.
    ClientWins,
}

/// Resolution of a previously reported conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Conflict being resolved.
    pub conflict_id: ConflictId,
    /// Policy applied.
    pub resolution_type: ResolutionType,
    /// State to adopt, for server-wins and merge.
    pub new_state: Option<Box<MatchState>>,
    /// Last action both sides agree on.
    pub rollback_to_action: Option<ActionId>,
}

/// Severity of a reported hash mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchSeverity {
    /// Small divergence; a diff will do.
    Warning,
    /// Large divergence; replace the state.
    Critical,
}

/// A remote action's parent hash did not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashMismatch {
    /// Hash the reporter holds.
    pub expected_hash: StateHash,
    /// Hash the action claimed as parent.
    pub received_hash: StateHash,
    /// How far apart the two sides are.
    pub severity: MismatchSeverity,
}

/// Liveness beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Sender's clock, unix millis.
    pub sent_at: u64,
}

/// Acknowledgment of an envelope that required one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Acknowledged envelope.
    pub message_id: MessageId,
    /// Action carried by that envelope, if any.
    pub action_id: Option<ActionId>,
}

/// Presence transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Subscribed to the room channel.
    Joined,
    /// Left the room channel.
    Left,
}

/// Presence announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Announcing player.
    pub player_id: PlayerId,
    /// Transition.
    pub status: PresenceStatus,
}

/// Match-level notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// A turn deadline passed and an end_turn was synthesized.
    TurnTimedOut {
        /// Seat whose turn expired.
        seat: Seat,
    },
    /// The match reached its terminal phase.
    MatchFinished {
        /// Winning seat.
        winner: Seat,
    },
}

/// Error notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Reconnection notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconnect {
    /// Attempt that succeeded.
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_is_tagged() {
        let ping = SyncMessage::Ping(SyncPing {
            local_hash: StateHash::from_bytes([1; 32]),
            timestamp: 10,
            turn_number: 3,
            last_action_id: None,
        });
        let json = serde_json::to_value(&ping).unwrap();
        assert_eq!(json["type"], "ping");
        assert_eq!(json["turn_number"], 3);
        let restored: SyncMessage = serde_json::from_value(json).unwrap();
        assert_eq!(ping, restored);
    }

    #[test]
    fn diff_ops_are_tagged() {
        let diff = StateDiff::PlayerHp {
            seat: Seat::Two,
            hp: 7,
        };
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["op"], "player_hp");
        assert_eq!(json["seat"], 2);
    }

    #[test]
    fn game_event_tagged_by_event() {
        let event = GameEvent::MatchFinished { winner: Seat::One };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "match_finished");
        assert_eq!(json["winner"], 1);
    }
}
