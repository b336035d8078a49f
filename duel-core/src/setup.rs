//! Building the initial match state from two decks.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use thiserror::Error;

use duelsync_types::{
    CardId, CardInstance, CardOverlay, FighterId, LogEntry, LogEvent, MatchState, Phase, PlayerId,
    PlayerState, RoomId, Seat, StateHash, Zone,
};

use crate::hash;
use crate::registry::FighterRegistry;
use crate::rules::RulesConfig;

/// Errors from [`MatchSetup::build`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// A seat brought no cards.
    #[error("{seat} has an empty deck")]
    EmptyDeck {
        /// Offending seat.
        seat: Seat,
    },

    /// A deck references a fighter the registry does not know.
    #[error("{seat} deck contains unknown fighter {fighter}")]
    UnknownFighter {
        /// Offending seat.
        seat: Seat,
        /// Unknown template id.
        fighter: FighterId,
    },

    /// Both seats have the same identity.
    #[error("player {0} cannot face themselves")]
    SamePlayer(PlayerId),
}

/// One seat's entry: who sits there and which fighters they bring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatEntry {
    /// Player identity.
    pub player_id: PlayerId,
    /// Fighter templates in draw order, top first.
    pub deck: Vec<FighterId>,
}

impl SeatEntry {
    /// Create an entry.
    pub fn new(player_id: impl Into<PlayerId>, deck: Vec<FighterId>) -> Self {
        Self {
            player_id: player_id.into(),
            deck,
        }
    }
}

/// Deals a new match.
///
/// Both peers must build from the same entries (and the same shuffle seed)
/// to start from the same hash.
#[derive(Debug, Clone)]
pub struct MatchSetup {
    room_id: RoomId,
    seats: [SeatEntry; 2],
}

impl MatchSetup {
    /// Seat one moves first.
    pub fn new(room_id: RoomId, one: SeatEntry, two: SeatEntry) -> Self {
        Self {
            room_id,
            seats: [one, two],
        }
    }

    /// Shuffle both decks.
    pub fn shuffled<R: Rng + ?Sized>(mut self, rng: &mut R) -> Self {
        for seat in self.seats.iter_mut() {
            seat.deck.shuffle(rng);
        }
        self
    }

    /// The room being set up.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Entry for a seat.
    pub fn seat(&self, seat: Seat) -> &SeatEntry {
        &self.seats[seat.index()]
    }

    /// Deal hands and benches and open turn one in the draw phase.
    pub fn build(
        &self,
        rules: &RulesConfig,
        registry: &dyn FighterRegistry,
        now: u64,
    ) -> Result<MatchState, SetupError> {
        if self.seats[0].player_id == self.seats[1].player_id {
            return Err(SetupError::SamePlayer(self.seats[0].player_id.clone()));
        }

        let one = self.deal(Seat::One, rules, registry)?;
        let two = self.deal(Seat::Two, rules, registry)?;

        let mut state = MatchState {
            room_id: self.room_id.clone(),
            players: [one, two],
            turn: 1,
            phase: Phase::Setup,
            current: Seat::One,
            log: VecDeque::new(),
            turn_deadline: now + rules.turn_duration_ms,
            winner: None,
            updated_at: now,
            state_hash: StateHash::zero(),
        };

        let first = state.player_mut(Seat::One);
        first.energy = 1;
        first.max_energy = 1;
        first.actions_remaining = 1;

        state.push_log(
            LogEntry {
                turn: 1,
                timestamp: now,
                actor: None,
                event: LogEvent::MatchStarted,
            },
            rules.log_capacity,
        );
        state.phase = Phase::Draw;
        hash::refresh(&mut state);

        tracing::debug!(room = %self.room_id, hash = %state.state_hash, "match dealt");
        Ok(state)
    }

    fn deal(
        &self,
        seat: Seat,
        rules: &RulesConfig,
        registry: &dyn FighterRegistry,
    ) -> Result<PlayerState, SetupError> {
        let entry = self.seat(seat);
        if entry.deck.is_empty() {
            return Err(SetupError::EmptyDeck { seat });
        }

        let mut cards = Vec::with_capacity(entry.deck.len());
        for (index, fighter) in entry.deck.iter().enumerate() {
            let template = registry.lookup(*fighter).ok_or(SetupError::UnknownFighter {
                seat,
                fighter: *fighter,
            })?;
            cards.push(CardInstance {
                id: CardId::new(format!("p{}-{:03}", u8::from(seat), index)),
                template_id: *fighter,
                zone: Zone::Bench,
                overlay: CardOverlay {
                    current_hp: template.pv,
                    can_attack: false,
                    summoned_this_turn: false,
                },
            });
        }

        let split = rules.initial_hand.min(cards.len());
        let bench = cards.split_off(split);
        let hand = cards
            .into_iter()
            .map(|mut card| {
                card.zone = Zone::Hand;
                card
            })
            .collect();

        Ok(PlayerState {
            id: entry.player_id.clone(),
            hp: rules.starting_hp,
            max_hp: rules.starting_hp,
            energy: 0,
            max_energy: 0,
            hand,
            field: Vec::new(),
            bench,
            graveyard: Vec::new(),
            cards_drawn_this_turn: 0,
            actions_remaining: 0,
            ping_ms: None,
            last_heartbeat: None,
        })
    }
}
