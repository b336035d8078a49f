//! The match model: fighters, card instances, players and the match itself.
//!
//! These are plain data. Every rule that changes them lives in duelsync-core.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::{CardId, FighterId, PlayerId, RoomId, Seat, StateHash};

/// Rarity tier of a fighter, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rarity {
    /// Common.
    #[serde(rename = "Commune")]
    Commune,
    /// Rare.
    #[serde(rename = "Rare")]
    Rare,
    /// Epic.
    #[serde(rename = "Épique")]
    Epique,
    /// Legendary.
    #[serde(rename = "Légendaire")]
    Legendaire,
}

/// Immutable fighter template, looked up by id from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FighterTemplate {
    /// Registry key.
    pub id: FighterId,
    /// Display name.
    pub name: String,
    /// Attack strength.
    pub force: u32,
    /// Vitality; a summoned card starts with this many hit points.
    pub pv: u32,
    /// Damage reduction.
    pub endurance: u32,
    /// Speed.
    pub vitesse: u32,
    /// Rarity tier.
    pub rarity: Rarity,
    /// Collection value.
    pub valeur: u32,
}

/// The collection a card currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// In the owner's hand.
    Hand,
    /// In play.
    Field,
    /// The draw pile.
    Bench,
    /// Destroyed.
    Graveyard,
}

impl Zone {
    /// All zones.
    pub const ALL: [Zone; 4] = [Zone::Hand, Zone::Field, Zone::Bench, Zone::Graveyard];
}

/// Mutable combat state layered over a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardOverlay {
    /// Remaining hit points.
    pub current_hp: u32,
    /// May attack this combat phase.
    pub can_attack: bool,
    /// Entered the field during the current turn.
    pub summoned_this_turn: bool,
}

/// One physical card in a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInstance {
    /// Unique instance id.
    pub id: CardId,
    /// Template this card was printed from.
    pub template_id: FighterId,
    /// Zone this card is in. Always equals the collection holding it.
    pub zone: Zone,
    /// Mutable combat overlay.
    pub overlay: CardOverlay,
}

/// Per-player portion of the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Roster identity.
    pub id: PlayerId,
    /// Current hit points, `0..=max_hp`.
    pub hp: u32,
    /// Hit point ceiling.
    pub max_hp: u32,
    /// Energy available this turn, `0..=max_energy`.
    pub energy: u32,
    /// Energy ceiling, grows by one per turn up to the cap.
    pub max_energy: u32,
    /// Cards in hand.
    pub hand: Vec<CardInstance>,
    /// Cards in play.
    pub field: Vec<CardInstance>,
    /// Draw pile; the front is the top card.
    pub bench: Vec<CardInstance>,
    /// Destroyed cards.
    pub graveyard: Vec<CardInstance>,
    /// Cards drawn during the current turn.
    pub cards_drawn_this_turn: u32,
    /// Summons left during the current turn.
    pub actions_remaining: u32,
    /// Last measured latency to this player.
    pub ping_ms: Option<u64>,
    /// Unix millis of this player's last heartbeat.
    pub last_heartbeat: Option<u64>,
}

impl PlayerState {
    /// Borrow the collection for a zone.
    pub fn zone(&self, zone: Zone) -> &Vec<CardInstance> {
        match zone {
            Zone::Hand => &self.hand,
            Zone::Field => &self.field,
            Zone::Bench => &self.bench,
            Zone::Graveyard => &self.graveyard,
        }
    }

    /// Mutably borrow the collection for a zone.
    pub fn zone_mut(&mut self, zone: Zone) -> &mut Vec<CardInstance> {
        match zone {
            Zone::Hand => &mut self.hand,
            Zone::Field => &mut self.field,
            Zone::Bench => &mut self.bench,
            Zone::Graveyard => &mut self.graveyard,
        }
    }

    /// Find a card in any zone.
    pub fn find_card(&self, id: &CardId) -> Option<&CardInstance> {
        Zone::ALL
            .iter()
            .find_map(|zone| self.zone(*zone).iter().find(|card| &card.id == id))
    }

    /// Find a card in a specific zone.
    pub fn card_in(&self, zone: Zone, id: &CardId) -> Option<&CardInstance> {
        self.zone(zone).iter().find(|card| &card.id == id)
    }

    /// Total number of cards across all zones.
    pub fn card_count(&self) -> usize {
        Zone::ALL.iter().map(|zone| self.zone(*zone).len()).sum()
    }
}

/// Match phase. Cycles draw → main → combat until finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before the first turn.
    Setup,
    /// Only `draw_card` is admissible.
    Draw,
    /// Summoning.
    Main,
    /// Attacking.
    Combat,
    /// Terminal.
    Finished,
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    /// Loser's hit points reached zero.
    KnockOut,
    /// Loser had neither hand nor bench left.
    DeckOut,
    /// Loser surrendered.
    Surrender,
    /// Loser's connection was lost for good.
    Abandoned,
}

/// What a log entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// The match began.
    MatchStarted,
    /// A card moved from bench to hand.
    CardDrawn {
        /// The drawn card.
        card_id: CardId,
    },
    /// The draw phase passed with an empty bench.
    DrawSkipped,
    /// A fighter entered the field.
    FighterSummoned {
        /// The summoned card.
        card_id: CardId,
        /// Energy paid.
        cost: u32,
    },
    /// A fighter attacked another fighter.
    Attacked {
        /// Attacking card.
        attacker_id: CardId,
        /// Defending card.
        target_id: CardId,
        /// Damage dealt.
        damage: u32,
        /// Whether the target was destroyed.
        destroyed: bool,
    },
    /// A surviving target struck back.
    Countered {
        /// Countering card.
        attacker_id: CardId,
        /// Card hit by the counter.
        target_id: CardId,
        /// Damage dealt.
        damage: u32,
        /// Whether the original attacker was destroyed.
        destroyed: bool,
    },
    /// A fighter hit the opposing player directly.
    DirectHit {
        /// Attacking card.
        attacker_id: CardId,
        /// Damage dealt.
        damage: u32,
    },
    /// The turn passed to the other player.
    TurnEnded {
        /// Player whose turn begins.
        next: Seat,
    },
    /// The match ended.
    Victory {
        /// Winning seat.
        winner: Seat,
        /// Cause.
        reason: WinReason,
    },
}

/// One combat log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Turn the event happened in.
    pub turn: u32,
    /// Unix millis.
    pub timestamp: u64,
    /// Acting seat, if any.
    pub actor: Option<Seat>,
    /// What happened.
    pub event: LogEvent,
}

/// Authoritative state of one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    /// Room this match is played in.
    pub room_id: RoomId,
    /// Seat one then seat two.
    pub players: [PlayerState; 2],
    /// Turn counter, starting at 1.
    pub turn: u32,
    /// Current phase.
    pub phase: Phase,
    /// Seat whose turn it is.
    pub current: Seat,
    /// Bounded combat log, oldest first.
    pub log: VecDeque<LogEntry>,
    /// Unix millis after which the current turn is forcibly ended.
    pub turn_deadline: u64,
    /// Winner once the phase is finished.
    pub winner: Option<Seat>,
    /// Unix millis of the last applied change.
    pub updated_at: u64,
    /// Canonical hash of this state, refreshed after every change.
    pub state_hash: StateHash,
}

impl MatchState {
    /// Borrow a player.
    pub fn player(&self, seat: Seat) -> &PlayerState {
        &self.players[seat.index()]
    }

    /// Mutably borrow a player.
    pub fn player_mut(&mut self, seat: Seat) -> &mut PlayerState {
        &mut self.players[seat.index()]
    }

    /// Seat of the player with the given identity.
    pub fn seat_of(&self, id: &PlayerId) -> Option<Seat> {
        Seat::both()
            .into_iter()
            .find(|seat| &self.player(*seat).id == id)
    }

    /// Whether the match has reached its terminal phase.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Append a log entry, dropping the oldest beyond `capacity`.
    pub fn push_log(&mut self, entry: LogEntry, capacity: usize) {
        self.log.push_back(entry);
        while self.log.len() > capacity {
            self.log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, zone: Zone) -> CardInstance {
        CardInstance {
            id: CardId::from(id),
            template_id: FighterId::new(1),
            zone,
            overlay: CardOverlay {
                current_hp: 5,
                can_attack: false,
                summoned_this_turn: false,
            },
        }
    }

    fn player(id: &str) -> PlayerState {
        PlayerState {
            id: PlayerId::from(id),
            hp: 20,
            max_hp: 20,
            energy: 1,
            max_energy: 1,
            hand: vec![card("h1", Zone::Hand)],
            field: vec![card("f1", Zone::Field)],
            bench: vec![card("b1", Zone::Bench), card("b2", Zone::Bench)],
            graveyard: vec![],
            cards_drawn_this_turn: 0,
            actions_remaining: 1,
            ping_ms: None,
            last_heartbeat: None,
        }
    }

    fn state() -> MatchState {
        MatchState {
            room_id: RoomId::from("room"),
            players: [player("alice"), player("bob")],
            turn: 1,
            phase: Phase::Draw,
            current: Seat::One,
            log: VecDeque::new(),
            turn_deadline: 0,
            winner: None,
            updated_at: 0,
            state_hash: StateHash::zero(),
        }
    }

    #[test]
    fn find_card_searches_every_zone() {
        let p = player("alice");
        assert_eq!(p.find_card(&CardId::from("b2")).unwrap().zone, Zone::Bench);
        assert!(p.card_in(Zone::Hand, &CardId::from("b2")).is_none());
        assert!(p.find_card(&CardId::from("zz")).is_none());
        assert_eq!(p.card_count(), 4);
    }

    #[test]
    fn log_is_bounded() {
        let mut s = state();
        for turn in 0..60 {
            s.push_log(
                LogEntry {
                    turn,
                    timestamp: 0,
                    actor: None,
                    event: LogEvent::DrawSkipped,
                },
                50,
            );
        }
        assert_eq!(s.log.len(), 50);
        assert_eq!(s.log.front().unwrap().turn, 10);
    }

    #[test]
    fn seat_lookup_by_player() {
        let s = state();
        assert_eq!(s.seat_of(&PlayerId::from("bob")), Some(Seat::Two));
        assert_eq!(s.seat_of(&PlayerId::from("carol")), None);
    }

    #[test]
    fn rarity_uses_display_names_on_the_wire() {
        let json = serde_json::to_string(&Rarity::Legendaire).unwrap();
        assert_eq!(json, "\"Légendaire\"");
        assert!(Rarity::Commune < Rarity::Legendaire);
    }

    #[test]
    fn match_state_json_roundtrip() {
        let s = state();
        let json = serde_json::to_string(&s).unwrap();
        let restored: MatchState = serde_json::from_str(&json).unwrap();
        assert_eq!(s, restored);
    }
}
