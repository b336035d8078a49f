//! Ready-made fighters, decks and matches for demos and tests.

use std::sync::Arc;

use duelsync_types::{
    Action, ActionId, ActionPayload, FighterId, FighterTemplate, MatchState, Rarity, RoomId, Seat,
};

use crate::registry::StaticRegistry;
use crate::rules::{RulesConfig, RulesEngine};
use crate::setup::{MatchSetup, SeatEntry};

/// Fixed start time so sample matches hash identically everywhere.
pub const SAMPLE_EPOCH: u64 = 1_700_000_000_000;

/// Build a template with a derived speed and value.
pub fn fighter(id: u32, force: u32, pv: u32, endurance: u32, rarity: Rarity) -> FighterTemplate {
    FighterTemplate {
        id: FighterId::new(id),
        name: format!("fighter-{id}"),
        force,
        pv,
        endurance,
        vitesse: (force + endurance) / 2 + 1,
        rarity,
        valeur: (force + pv + endurance) * 10,
    }
}

fn named(mut template: FighterTemplate, name: &str) -> FighterTemplate {
    template.name = name.to_string();
    template
}

/// A small balanced roster.
pub fn sample_registry() -> StaticRegistry {
    [
        named(fighter(1, 3, 5, 2, Rarity::Commune), "Squire"),
        named(fighter(2, 4, 4, 1, Rarity::Commune), "Archer"),
        named(fighter(3, 2, 8, 4, Rarity::Commune), "Shieldbearer"),
        named(fighter(4, 5, 6, 2, Rarity::Rare), "Duelist"),
        named(fighter(5, 4, 10, 4, Rarity::Rare), "Warden"),
        named(fighter(6, 7, 7, 1, Rarity::Epique), "Berserker"),
        named(fighter(7, 8, 12, 4, Rarity::Legendaire), "Champion"),
        named(fighter(10, 4, 6, 3, Rarity::Commune), "Lancer"),
        named(fighter(11, 2, 5, 2, Rarity::Commune), "Skirmisher"),
        named(fighter(12, 6, 12, 5, Rarity::Rare), "Bastion"),
    ]
    .into_iter()
    .collect()
}

/// Fifteen-card deck drawn from [`sample_registry`].
pub fn sample_deck() -> Vec<FighterId> {
    [1, 2, 3, 10, 11, 4, 5, 12, 6, 1, 2, 10, 11, 3, 7]
        .into_iter()
        .map(FighterId::new)
        .collect()
}

/// Unshuffled alice-versus-bob setup in `room`.
pub fn sample_setup(room: &str) -> MatchSetup {
    MatchSetup::new(
        RoomId::from(room),
        SeatEntry::new("alice", sample_deck()),
        SeatEntry::new("bob", sample_deck()),
    )
}

/// Engine over the sample roster with default rules.
pub fn sample_engine() -> RulesEngine {
    RulesEngine::new(RulesConfig::default(), Arc::new(sample_registry()))
}

/// Freshly dealt sample match, seat one to draw.
pub fn sample_match() -> MatchState {
    let rules = RulesConfig::default();
    match sample_setup("sample-room").build(&rules, &sample_registry(), SAMPLE_EPOCH) {
        Ok(state) => state,
        Err(e) => unreachable!("sample decks only use sample fighters: {e}"),
    }
}

/// An action by `actor` issued against `state`, one second after its last update.
pub fn action(state: &MatchState, actor: Seat, payload: ActionPayload) -> Action {
    Action {
        id: ActionId::new(),
        actor,
        payload,
        turn: state.turn,
        sequence: 0,
        prev_hash: state.state_hash,
        timestamp: state.updated_at + 1_000,
    }
}
