//! Player actions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ActionId, CardId, Seat, StateHash};

/// What an action does. Each variant carries only the fields it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Draw the top card of the bench.
    DrawCard,
    /// Put a card from hand onto the field.
    SummonFighter {
        /// Card to summon.
        card_id: CardId,
    },
    /// Attack with a field card. No target means a direct attack.
    Attack {
        /// Attacking card.
        attacker_id: CardId,
        /// Defending card, if any.
        #[serde(default)]
        target_id: Option<CardId>,
    },
    /// Pass the turn.
    EndTurn,
    /// Concede the match.
    Surrender,
}

impl ActionPayload {
    /// Fieldless discriminant, used for conflict classification.
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::DrawCard => ActionKind::DrawCard,
            ActionPayload::SummonFighter { .. } => ActionKind::SummonFighter,
            ActionPayload::Attack { .. } => ActionKind::Attack,
            ActionPayload::EndTurn => ActionKind::EndTurn,
            ActionPayload::Surrender => ActionKind::Surrender,
        }
    }
}

/// Discriminant of [`ActionPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// `draw_card`
    DrawCard,
    /// `summon_fighter`
    SummonFighter,
    /// `attack`
    Attack,
    /// `end_turn`
    EndTurn,
    /// `surrender`
    Surrender,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::DrawCard => "draw_card",
            ActionKind::SummonFighter => "summon_fighter",
            ActionKind::Attack => "attack",
            ActionKind::EndTurn => "end_turn",
            ActionKind::Surrender => "surrender",
        };
        f.write_str(name)
    }
}

/// An action issued by one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Unique id, also the key for pending reconciliation.
    pub id: ActionId,
    /// Seat issuing the action.
    pub actor: Seat,
    /// What to do.
    pub payload: ActionPayload,
    /// Turn number the action was issued in.
    pub turn: u32,
    /// Per-seat monotonically increasing sequence number.
    pub sequence: u64,
    /// Hash of the issuer's state just before the action.
    pub prev_hash: StateHash,
    /// Unix millis at issue time.
    pub timestamp: u64,
}

impl Action {
    /// Kind of this action.
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}
