//! Rules engine: the turn and phase state machine.
//!
//! [`RulesEngine::apply`] is the only way an action changes a match. It
//! validates first and works on a copy, so a rejected action leaves the
//! input untouched and writes no log entry.
//!
//! ```text
//! setup → draw → main → combat → (end_turn) → draw → … → finished
//! ```

use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use duelsync_types::{
    Action, ActionKind, ActionPayload, CardId, CardInstance, FighterId, FighterTemplate, LogEntry,
    LogEvent, MatchState, Phase, Seat, WinReason, Zone,
};

use crate::hash;
use crate::registry::{summon_cost, FighterRegistry};

/// Tunable match rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RulesConfig {
    /// Starting and maximum player hit points (default: 20).
    #[serde(default = "default_starting_hp")]
    pub starting_hp: u32,
    /// Cards dealt to each hand at setup (default: 5).
    #[serde(default = "default_initial_hand")]
    pub initial_hand: usize,
    /// Maximum cards on a field (default: 5).
    #[serde(default = "default_field_limit")]
    pub field_limit: usize,
    /// Ceiling for max energy (default: 10).
    #[serde(default = "default_energy_cap")]
    pub energy_cap: u32,
    /// Combat log entries kept (default: 50).
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Length of a turn in milliseconds (default: 90s).
    #[serde(default = "default_turn_duration_ms")]
    pub turn_duration_ms: u64,
}

fn default_starting_hp() -> u32 {
    20
}

fn default_initial_hand() -> usize {
    5
}

fn default_field_limit() -> usize {
    5
}

fn default_energy_cap() -> u32 {
    10
}

fn default_log_capacity() -> usize {
    50
}

fn default_turn_duration_ms() -> u64 {
    90_000
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            starting_hp: default_starting_hp(),
            initial_hand: default_initial_hand(),
            field_limit: default_field_limit(),
            energy_cap: default_energy_cap(),
            log_capacity: default_log_capacity(),
            turn_duration_ms: default_turn_duration_ms(),
        }
    }
}

/// Why an action was not admissible.
///
/// A rejection is a normal outcome, not a failure: the caller drops the
/// action and the state stays as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The match is over.
    #[error("match already finished")]
    MatchFinished,

    /// Only the current player may act (surrender excepted).
    #[error("{actor} acted during {current}'s turn")]
    NotYourTurn {
        /// Seat that acted.
        actor: Seat,
        /// Seat whose turn it is.
        current: Seat,
    },

    /// Action kind not admissible in this phase.
    #[error("{action} not allowed during {phase:?}")]
    WrongPhase {
        /// Attempted action.
        action: ActionKind,
        /// Current phase.
        phase: Phase,
    },

    /// No summons left this turn.
    #[error("no actions remaining this turn")]
    NoActionsRemaining,

    /// Card is not in the actor's hand.
    #[error("card {0} is not in hand")]
    CardNotInHand(CardId),

    /// Field already holds the maximum number of cards.
    #[error("field is full ({limit} cards)")]
    FieldFull {
        /// Field limit.
        limit: usize,
    },

    /// Not enough energy to pay the summon cost.
    #[error("summon costs {cost} energy, {available} available")]
    InsufficientEnergy {
        /// Cost of the summon.
        cost: u32,
        /// Energy the actor has.
        available: u32,
    },

    /// Card references a template the registry does not know.
    #[error("unknown fighter {0}")]
    UnknownFighter(FighterId),

    /// Attacker is not on the actor's field.
    #[error("attacker {0} is not on the field")]
    AttackerNotOnField(CardId),

    /// Attacker may not attack right now.
    #[error("attacker {0} cannot attack")]
    AttackerNotReady(CardId),

    /// Target is not on the opponent's field.
    #[error("target {0} is not on the opposing field")]
    TargetNotOnField(CardId),

    /// Direct attacks need an empty opposing field.
    #[error("direct attack blocked by opposing fighters")]
    OpponentFieldNotEmpty,
}

/// Applies actions to match states.
#[derive(Clone)]
pub struct RulesEngine {
    config: RulesConfig,
    registry: Arc<dyn FighterRegistry>,
}

impl std::fmt::Debug for RulesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RulesEngine {
    /// Create an engine over a fighter registry.
    pub fn new(config: RulesConfig, registry: Arc<dyn FighterRegistry>) -> Self {
        Self { config, registry }
    }

    /// The rules in force.
    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    /// The fighter registry.
    pub fn registry(&self) -> &dyn FighterRegistry {
        self.registry.as_ref()
    }

    /// Check every admissibility rule without changing anything.
    pub fn validate(&self, state: &MatchState, action: &Action) -> Result<(), Rejection> {
        if state.is_finished() {
            return Err(Rejection::MatchFinished);
        }
        let actor = action.actor;
        if !matches!(action.payload, ActionPayload::Surrender) && actor != state.current {
            return Err(Rejection::NotYourTurn {
                actor,
                current: state.current,
            });
        }

        match &action.payload {
            ActionPayload::DrawCard => self.require_phase(state, action, Phase::Draw),
            ActionPayload::SummonFighter { card_id } => {
                self.require_phase(state, action, Phase::Main)?;
                self.validate_summon(state, actor, card_id).map(|_| ())
            }
            ActionPayload::Attack {
                attacker_id,
                target_id,
            } => {
                self.require_phase(state, action, Phase::Combat)?;
                self.validate_attack(state, actor, attacker_id, target_id.as_ref())
            }
            ActionPayload::EndTurn | ActionPayload::Surrender => Ok(()),
        }
    }

    /// Apply an action, returning the next state.
    ///
    /// On rejection the input is unchanged; callers treat it as a no-op.
    pub fn apply(&self, state: &MatchState, action: &Action) -> Result<MatchState, Rejection> {
        self.validate(state, action)?;

        let mut next = state.clone();
        match &action.payload {
            ActionPayload::DrawCard => self.draw(&mut next, action),
            ActionPayload::SummonFighter { card_id } => self.summon(&mut next, action, card_id)?,
            ActionPayload::Attack {
                attacker_id,
                target_id,
            } => self.attack(&mut next, action, attacker_id, target_id.as_ref())?,
            ActionPayload::EndTurn => self.end_turn(&mut next, action),
            ActionPayload::Surrender => {
                self.declare_winner(&mut next, action.actor.opponent(), WinReason::Surrender, action)
            }
        }

        next.updated_at = action.timestamp;
        hash::refresh(&mut next);
        Ok(next)
    }

    /// Forfeit on behalf of a seat that can no longer take part.
    ///
    /// Bypasses turn checks; a finished match is returned unchanged.
    pub fn abandon(&self, state: &MatchState, seat: Seat, now: u64) -> MatchState {
        let mut next = state.clone();
        if next.is_finished() {
            return next;
        }
        next.phase = Phase::Finished;
        next.winner = Some(seat.opponent());
        next.push_log(
            LogEntry {
                turn: next.turn,
                timestamp: now,
                actor: Some(seat),
                event: LogEvent::Victory {
                    winner: seat.opponent(),
                    reason: WinReason::Abandoned,
                },
            },
            self.config.log_capacity,
        );
        next.updated_at = now;
        hash::refresh(&mut next);
        next
    }

    fn require_phase(&self, state: &MatchState, action: &Action, phase: Phase) -> Result<(), Rejection> {
        if state.phase == phase {
            Ok(())
        } else {
            Err(Rejection::WrongPhase {
                action: action.kind(),
                phase: state.phase,
            })
        }
    }

    fn template(&self, card: &CardInstance) -> Result<&FighterTemplate, Rejection> {
        self.registry
            .lookup(card.template_id)
            .ok_or(Rejection::UnknownFighter(card.template_id))
    }

    fn validate_summon(&self, state: &MatchState, actor: Seat, card_id: &CardId) -> Result<u32, Rejection> {
        let player = state.player(actor);
        if player.actions_remaining == 0 {
            return Err(Rejection::NoActionsRemaining);
        }
        let card = player
            .card_in(Zone::Hand, card_id)
            .ok_or_else(|| Rejection::CardNotInHand(card_id.clone()))?;
        if player.field.len() >= self.config.field_limit {
            return Err(Rejection::FieldFull {
                limit: self.config.field_limit,
            });
        }
        let cost = summon_cost(self.template(card)?);
        if player.energy < cost {
            return Err(Rejection::InsufficientEnergy {
                cost,
                available: player.energy,
            });
        }
        Ok(cost)
    }

    fn validate_attack(
        &self,
        state: &MatchState,
        actor: Seat,
        attacker_id: &CardId,
        target_id: Option<&CardId>,
    ) -> Result<(), Rejection> {
        let attacker = state
            .player(actor)
            .card_in(Zone::Field, attacker_id)
            .ok_or_else(|| Rejection::AttackerNotOnField(attacker_id.clone()))?;
        if !attacker.overlay.can_attack || attacker.overlay.summoned_this_turn {
            return Err(Rejection::AttackerNotReady(attacker_id.clone()));
        }
        self.template(attacker)?;

        let defender = state.player(actor.opponent());
        match target_id {
            Some(target_id) => {
                let target = defender
                    .card_in(Zone::Field, target_id)
                    .ok_or_else(|| Rejection::TargetNotOnField(target_id.clone()))?;
                self.template(target)?;
                Ok(())
            }
            None if defender.field.is_empty() => Ok(()),
            None => Err(Rejection::OpponentFieldNotEmpty),
        }
    }

    fn draw(&self, state: &mut MatchState, action: &Action) {
        let actor = action.actor;
        let player = state.player_mut(actor);
        let event = if player.bench.is_empty() {
            LogEvent::DrawSkipped
        } else {
            let mut card = player.bench.remove(0);
            card.zone = Zone::Hand;
            let card_id = card.id.clone();
            player.hand.push(card);
            player.cards_drawn_this_turn += 1;
            LogEvent::CardDrawn { card_id }
        };
        self.log(state, action, event);

        // The phase advances whether or not a card was drawn.
        state.phase = Phase::Main;
        self.check_deck_out(state, actor, action);
    }

    fn summon(&self, state: &mut MatchState, action: &Action, card_id: &CardId) -> Result<(), Rejection> {
        let actor = action.actor;
        let cost = self.validate_summon(state, actor, card_id)?;

        let player = state.player_mut(actor);
        let mut card = take_card(&mut player.hand, card_id)
            .ok_or_else(|| Rejection::CardNotInHand(card_id.clone()))?;
        card.zone = Zone::Field;
        card.overlay.can_attack = false;
        card.overlay.summoned_this_turn = true;
        player.field.push(card);
        player.energy -= cost;
        player.actions_remaining -= 1;
        let exhausted = player.actions_remaining == 0;

        self.log(
            state,
            action,
            LogEvent::FighterSummoned {
                card_id: card_id.clone(),
                cost,
            },
        );

        if exhausted {
            state.phase = Phase::Combat;
            for card in state.player_mut(actor).field.iter_mut() {
                if !card.overlay.summoned_this_turn {
                    card.overlay.can_attack = true;
                }
            }
        }
        Ok(())
    }

    fn attack(
        &self,
        state: &mut MatchState,
        action: &Action,
        attacker_id: &CardId,
        target_id: Option<&CardId>,
    ) -> Result<(), Rejection> {
        let actor = action.actor;
        let defender = actor.opponent();
        let attacker = state
            .player(actor)
            .card_in(Zone::Field, attacker_id)
            .cloned()
            .ok_or_else(|| Rejection::AttackerNotOnField(attacker_id.clone()))?;
        let attacker_stats = self.template(&attacker)?.clone();

        let Some(target_id) = target_id else {
            let damage = attacker_stats.force;
            let opponent = state.player_mut(defender);
            opponent.hp = opponent.hp.saturating_sub(damage);
            let knocked_out = opponent.hp == 0;
            set_can_attack(state, actor, attacker_id, false);
            self.log(
                state,
                action,
                LogEvent::DirectHit {
                    attacker_id: attacker_id.clone(),
                    damage,
                },
            );
            if knocked_out {
                self.declare_winner(state, actor, WinReason::KnockOut, action);
            }
            return Ok(());
        };

        let target = state
            .player(defender)
            .card_in(Zone::Field, target_id)
            .cloned()
            .ok_or_else(|| Rejection::TargetNotOnField(target_id.clone()))?;
        let target_stats = self.template(&target)?.clone();

        let damage = attacker_stats.force.saturating_sub(target_stats.endurance).max(1);
        let target_hp = target.overlay.current_hp.saturating_sub(damage);
        let destroyed = target_hp == 0;
        set_hp(state, defender, target_id, target_hp);
        if destroyed {
            send_to_graveyard(state, defender, target_id);
        }
        self.log(
            state,
            action,
            LogEvent::Attacked {
                attacker_id: attacker_id.clone(),
                target_id: target_id.clone(),
                damage,
                destroyed,
            },
        );

        // A surviving target strikes back only if it could attack itself.
        if !destroyed && target.overlay.can_attack && !target.overlay.summoned_this_turn {
            let counter = target_stats.force.saturating_sub(attacker_stats.endurance).max(1);
            let attacker_hp = attacker.overlay.current_hp.saturating_sub(counter);
            let attacker_destroyed = attacker_hp == 0;
            set_hp(state, actor, attacker_id, attacker_hp);
            if attacker_destroyed {
                send_to_graveyard(state, actor, attacker_id);
            }
            self.log(
                state,
                action,
                LogEvent::Countered {
                    attacker_id: target_id.clone(),
                    target_id: attacker_id.clone(),
                    damage: counter,
                    destroyed: attacker_destroyed,
                },
            );
        }

        set_can_attack(state, actor, attacker_id, false);
        Ok(())
    }

    fn end_turn(&self, state: &mut MatchState, action: &Action) {
        let ending = action.actor;
        let next = ending.opponent();

        for card in state.player_mut(ending).field.iter_mut() {
            card.overlay.can_attack = false;
        }

        state.current = next;
        state.turn += 1;
        state.phase = Phase::Draw;
        state.turn_deadline = action.timestamp + self.config.turn_duration_ms;

        let cap = self.config.energy_cap;
        let player = state.player_mut(next);
        player.cards_drawn_this_turn = 0;
        player.actions_remaining = 1;
        player.max_energy = (player.max_energy + 1).min(cap);
        player.energy = player.max_energy;
        for card in player.field.iter_mut() {
            if !card.overlay.summoned_this_turn {
                card.overlay.can_attack = true;
            }
            card.overlay.summoned_this_turn = false;
        }

        self.log(state, action, LogEvent::TurnEnded { next });
        self.check_deck_out(state, next, action);
    }

    /// A seat with neither hand nor bench loses.
    fn check_deck_out(&self, state: &mut MatchState, seat: Seat, action: &Action) {
        let player = state.player(seat);
        if player.hand.is_empty() && player.bench.is_empty() {
            tracing::debug!(%seat, "deck out");
            self.declare_winner(state, seat.opponent(), WinReason::DeckOut, action);
        }
    }

    fn declare_winner(&self, state: &mut MatchState, winner: Seat, reason: WinReason, action: &Action) {
        state.phase = Phase::Finished;
        state.winner = Some(winner);
        self.log(state, action, LogEvent::Victory { winner, reason });
    }

    fn log(&self, state: &mut MatchState, action: &Action, event: LogEvent) {
        let entry = LogEntry {
            turn: state.turn,
            timestamp: action.timestamp,
            actor: Some(action.actor),
            event,
        };
        state.push_log(entry, self.config.log_capacity);
    }
}

/// Remove a card from a collection by id.
fn take_card(cards: &mut Vec<CardInstance>, id: &CardId) -> Option<CardInstance> {
    let index = cards.iter().position(|card| &card.id == id)?;
    Some(cards.remove(index))
}

fn set_hp(state: &mut MatchState, seat: Seat, id: &CardId, hp: u32) {
    if let Some(card) = state.player_mut(seat).field.iter_mut().find(|c| &c.id == id) {
        card.overlay.current_hp = hp;
    }
}

fn set_can_attack(state: &mut MatchState, seat: Seat, id: &CardId, value: bool) {
    if let Some(card) = state.player_mut(seat).field.iter_mut().find(|c| &c.id == id) {
        card.overlay.can_attack = value;
    }
}

fn send_to_graveyard(state: &mut MatchState, seat: Seat, id: &CardId) {
    let player = state.player_mut(seat);
    if let Some(mut card) = take_card(&mut player.field, id) {
        card.zone = Zone::Graveyard;
        card.overlay.can_attack = false;
        card.overlay.summoned_this_turn = false;
        player.graveyard.push(card);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{self, action, fighter};
    use duelsync_types::{CardOverlay, Rarity};

    fn engine() -> RulesEngine {
        sample::sample_engine()
    }

    /// Put a card with the given template on a seat's field.
    fn place(state: &mut MatchState, seat: Seat, id: &str, template: u32, can_attack: bool) {
        let hp = sample::sample_registry()
            .lookup(FighterId::new(template))
            .map(|t| t.pv)
            .unwrap_or(1);
        state.player_mut(seat).field.push(CardInstance {
            id: CardId::from(id),
            template_id: FighterId::new(template),
            zone: Zone::Field,
            overlay: CardOverlay {
                current_hp: hp,
                can_attack,
                summoned_this_turn: false,
            },
        });
        hash::refresh(state);
    }

    fn combat_state() -> MatchState {
        let mut state = sample::sample_match();
        state.phase = Phase::Combat;
        state
    }

    #[test]
    fn draw_moves_top_card_and_advances() {
        let engine = engine();
        let state = sample::sample_match();
        let top = state.player(Seat::One).bench[0].id.clone();

        let next = engine.apply(&state, &action(&state, Seat::One, ActionPayload::DrawCard)).unwrap();

        let player = next.player(Seat::One);
        assert_eq!(next.phase, Phase::Main);
        assert_eq!(player.cards_drawn_this_turn, 1);
        assert_eq!(player.hand.last().unwrap().id, top);
        assert_eq!(player.hand.last().unwrap().zone, Zone::Hand);
        assert_eq!(player.bench.len(), state.player(Seat::One).bench.len() - 1);
        assert_eq!(player.card_count(), state.player(Seat::One).card_count());
        assert!(hash::verify(&next));
    }

    #[test]
    fn draw_with_empty_bench_still_advances() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.player_mut(Seat::One).bench.clear();

        let next = engine.apply(&state, &action(&state, Seat::One, ActionPayload::DrawCard)).unwrap();

        assert_eq!(next.phase, Phase::Main);
        assert_eq!(next.player(Seat::One).cards_drawn_this_turn, 0);
        assert!(matches!(next.log.back().unwrap().event, LogEvent::DrawSkipped));
    }

    #[test]
    fn rejection_leaves_state_unchanged() {
        let engine = engine();
        let state = sample::sample_match();
        let before = state.clone();
        let attack = action(
            &state,
            Seat::One,
            ActionPayload::Attack {
                attacker_id: CardId::from("p1-000"),
                target_id: None,
            },
        );

        let result = engine.apply(&state, &attack);

        assert!(matches!(result, Err(Rejection::WrongPhase { phase: Phase::Draw, .. })));
        assert_eq!(state, before);
    }

    #[test]
    fn only_current_player_acts() {
        let engine = engine();
        let state = sample::sample_match();
        let result = engine.apply(&state, &action(&state, Seat::Two, ActionPayload::DrawCard));
        assert_eq!(
            result,
            Err(Rejection::NotYourTurn {
                actor: Seat::Two,
                current: Seat::One
            })
        );
    }

    #[test]
    fn summon_pays_cost_and_enters_combat() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.phase = Phase::Main;
        state.player_mut(Seat::One).energy = 10;
        place(&mut state, Seat::One, "veteran", 1, false);
        let card_id = state.player(Seat::One).hand[0].id.clone();
        let template = engine.registry().lookup(state.player(Seat::One).hand[0].template_id).unwrap();
        let cost = summon_cost(template);

        let next = engine
            .apply(&state, &action(&state, Seat::One, ActionPayload::SummonFighter { card_id: card_id.clone() }))
            .unwrap();

        let player = next.player(Seat::One);
        assert_eq!(player.energy, 10 - cost);
        assert_eq!(player.actions_remaining, 0);
        assert_eq!(next.phase, Phase::Combat);
        let summoned = player.card_in(Zone::Field, &card_id).unwrap();
        assert!(!summoned.overlay.can_attack);
        assert!(summoned.overlay.summoned_this_turn);
        assert!(player.card_in(Zone::Hand, &card_id).is_none());
        let veteran = player.card_in(Zone::Field, &CardId::from("veteran")).unwrap();
        assert!(veteran.overlay.can_attack);
    }

    #[test]
    fn summon_requires_energy() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.phase = Phase::Main;
        state.player_mut(Seat::One).energy = 0;
        let card_id = state.player(Seat::One).hand[0].id.clone();

        let result = engine.apply(&state, &action(&state, Seat::One, ActionPayload::SummonFighter { card_id }));
        assert!(matches!(result, Err(Rejection::InsufficientEnergy { available: 0, .. })));
    }

    #[test]
    fn summon_respects_field_limit() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.phase = Phase::Main;
        state.player_mut(Seat::One).energy = 10;
        for i in 0..5 {
            place(&mut state, Seat::One, &format!("f{i}"), 1, false);
        }
        let card_id = state.player(Seat::One).hand[0].id.clone();

        let result = engine.apply(&state, &action(&state, Seat::One, ActionPayload::SummonFighter { card_id }));
        assert_eq!(result, Err(Rejection::FieldFull { limit: 5 }));
    }

    #[test]
    fn summon_rejects_card_outside_hand() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.phase = Phase::Main;
        state.player_mut(Seat::One).energy = 10;
        let bench_card = state.player(Seat::One).bench[0].id.clone();

        let result = engine.apply(
            &state,
            &action(&state, Seat::One, ActionPayload::SummonFighter { card_id: bench_card.clone() }),
        );
        assert_eq!(result, Err(Rejection::CardNotInHand(bench_card)));
    }

    #[test]
    fn summon_with_no_actions_left_is_rejected() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.phase = Phase::Main;
        state.player_mut(Seat::One).energy = 10;
        state.player_mut(Seat::One).actions_remaining = 0;
        let card_id = state.player(Seat::One).hand[0].id.clone();

        let result = engine.apply(&state, &action(&state, Seat::One, ActionPayload::SummonFighter { card_id }));
        assert_eq!(result, Err(Rejection::NoActionsRemaining));
    }

    #[test]
    fn targeted_attack_deals_force_minus_endurance() {
        let engine = engine();
        let mut state = combat_state();
        // force 4 vs endurance 2
        place(&mut state, Seat::One, "atk", 10, true);
        place(&mut state, Seat::Two, "def", 11, false);
        let before = state.player(Seat::Two).card_in(Zone::Field, &CardId::from("def")).unwrap().overlay.current_hp;

        let next = engine
            .apply(
                &state,
                &action(
                    &state,
                    Seat::One,
                    ActionPayload::Attack {
                        attacker_id: CardId::from("atk"),
                        target_id: Some(CardId::from("def")),
                    },
                ),
            )
            .unwrap();

        let target = next.player(Seat::Two).card_in(Zone::Field, &CardId::from("def")).unwrap();
        assert_eq!(target.overlay.current_hp, before - 2);
        let attacker = next.player(Seat::One).card_in(Zone::Field, &CardId::from("atk")).unwrap();
        assert!(!attacker.overlay.can_attack);
    }

    #[test]
    fn lethal_attack_moves_target_to_graveyard() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "atk", 10, true);
        place(&mut state, Seat::Two, "def", 11, false);
        state.player_mut(Seat::Two).field[0].overlay.current_hp = 2;

        let next = engine
            .apply(
                &state,
                &action(
                    &state,
                    Seat::One,
                    ActionPayload::Attack {
                        attacker_id: CardId::from("atk"),
                        target_id: Some(CardId::from("def")),
                    },
                ),
            )
            .unwrap();

        let defender = next.player(Seat::Two);
        assert!(defender.field.is_empty());
        let dead = defender.card_in(Zone::Graveyard, &CardId::from("def")).unwrap();
        assert_eq!(dead.zone, Zone::Graveyard);
        assert_eq!(dead.overlay.current_hp, 0);
    }

    #[test]
    fn surviving_target_counters() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "atk", 10, true);
        place(&mut state, Seat::Two, "tank", 12, true);
        let attacker_hp = state.player(Seat::One).field[0].overlay.current_hp;

        let next = engine
            .apply(
                &state,
                &action(
                    &state,
                    Seat::One,
                    ActionPayload::Attack {
                        attacker_id: CardId::from("atk"),
                        target_id: Some(CardId::from("tank")),
                    },
                ),
            )
            .unwrap();

        // tank force 6 vs attacker endurance 3
        let attacker = next.player(Seat::One).card_in(Zone::Field, &CardId::from("atk")).unwrap();
        assert_eq!(attacker.overlay.current_hp, attacker_hp - 3);
        assert!(matches!(next.log.back().unwrap().event, LogEvent::Countered { damage: 3, .. }));
    }

    #[test]
    fn target_that_cannot_attack_does_not_counter() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "atk", 10, true);
        place(&mut state, Seat::Two, "tank", 12, false);
        let attacker_hp = state.player(Seat::One).field[0].overlay.current_hp;

        let next = engine
            .apply(
                &state,
                &action(
                    &state,
                    Seat::One,
                    ActionPayload::Attack {
                        attacker_id: CardId::from("atk"),
                        target_id: Some(CardId::from("tank")),
                    },
                ),
            )
            .unwrap();

        let attacker = next.player(Seat::One).card_in(Zone::Field, &CardId::from("atk")).unwrap();
        assert_eq!(attacker.overlay.current_hp, attacker_hp);
        assert!(matches!(next.log.back().unwrap().event, LogEvent::Attacked { .. }));
    }

    #[test]
    fn damage_is_at_least_one() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "weak", 11, true);
        place(&mut state, Seat::Two, "tank", 12, false);
        let before = state.player(Seat::Two).field[0].overlay.current_hp;

        let next = engine
            .apply(
                &state,
                &action(
                    &state,
                    Seat::One,
                    ActionPayload::Attack {
                        attacker_id: CardId::from("weak"),
                        target_id: Some(CardId::from("tank")),
                    },
                ),
            )
            .unwrap();

        let tank = next.player(Seat::Two).card_in(Zone::Field, &CardId::from("tank")).unwrap();
        assert_eq!(tank.overlay.current_hp, before - 1);
    }

    #[test]
    fn direct_attack_blocked_by_opposing_field() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "atk", 10, true);
        place(&mut state, Seat::Two, "def", 11, false);

        let result = engine.apply(
            &state,
            &action(
                &state,
                Seat::One,
                ActionPayload::Attack {
                    attacker_id: CardId::from("atk"),
                    target_id: None,
                },
            ),
        );
        assert_eq!(result, Err(Rejection::OpponentFieldNotEmpty));
    }

    #[test]
    fn direct_attack_can_win() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "atk", 10, true);
        state.player_mut(Seat::Two).hp = 4;

        let next = engine
            .apply(
                &state,
                &action(
                    &state,
                    Seat::One,
                    ActionPayload::Attack {
                        attacker_id: CardId::from("atk"),
                        target_id: None,
                    },
                ),
            )
            .unwrap();

        assert_eq!(next.player(Seat::Two).hp, 0);
        assert_eq!(next.phase, Phase::Finished);
        assert_eq!(next.winner, Some(Seat::One));
        assert!(matches!(
            next.log.back().unwrap().event,
            LogEvent::Victory { winner: Seat::One, reason: WinReason::KnockOut }
        ));
    }

    #[test]
    fn freshly_summoned_fighter_cannot_attack() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "fresh", 10, true);
        state.player_mut(Seat::One).field[0].overlay.summoned_this_turn = true;

        let result = engine.apply(
            &state,
            &action(
                &state,
                Seat::One,
                ActionPayload::Attack {
                    attacker_id: CardId::from("fresh"),
                    target_id: None,
                },
            ),
        );
        assert_eq!(result, Err(Rejection::AttackerNotReady(CardId::from("fresh"))));
    }

    #[test]
    fn end_turn_resets_next_player() {
        let engine = engine();
        let mut state = combat_state();
        place(&mut state, Seat::One, "mine", 10, true);
        place(&mut state, Seat::Two, "theirs", 10, false);
        state.player_mut(Seat::Two).field[0].overlay.summoned_this_turn = false;
        state.player_mut(Seat::Two).max_energy = 3;
        state.player_mut(Seat::Two).energy = 0;
        state.player_mut(Seat::Two).cards_drawn_this_turn = 2;

        let end = action(&state, Seat::One, ActionPayload::EndTurn);
        let next = engine.apply(&state, &end).unwrap();

        assert_eq!(next.current, Seat::Two);
        assert_eq!(next.turn, state.turn + 1);
        assert_eq!(next.phase, Phase::Draw);
        assert_eq!(next.turn_deadline, end.timestamp + engine.config().turn_duration_ms);
        let incoming = next.player(Seat::Two);
        assert_eq!(incoming.actions_remaining, 1);
        assert_eq!(incoming.cards_drawn_this_turn, 0);
        assert_eq!(incoming.max_energy, 4);
        assert_eq!(incoming.energy, incoming.max_energy);
        assert!(incoming.field[0].overlay.can_attack);
        assert!(!next.player(Seat::One).field[0].overlay.can_attack);
    }

    #[test]
    fn end_turn_caps_energy() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.player_mut(Seat::Two).max_energy = 10;

        let next = engine.apply(&state, &action(&state, Seat::One, ActionPayload::EndTurn)).unwrap();
        assert_eq!(next.player(Seat::Two).max_energy, 10);
        assert_eq!(next.player(Seat::Two).energy, 10);
    }

    #[test]
    fn end_turn_clears_summoned_flags_of_next_player() {
        let engine = engine();
        let mut state = sample::sample_match();
        place(&mut state, Seat::Two, "new", 10, false);
        state.player_mut(Seat::Two).field[0].overlay.summoned_this_turn = true;

        let next = engine.apply(&state, &action(&state, Seat::One, ActionPayload::EndTurn)).unwrap();
        let card = &next.player(Seat::Two).field[0];
        assert!(!card.overlay.summoned_this_turn);
        assert!(!card.overlay.can_attack);
    }

    #[test]
    fn deck_out_at_draw_phase_start() {
        let engine = engine();
        let mut state = sample::sample_match();
        state.player_mut(Seat::Two).hand.clear();
        state.player_mut(Seat::Two).bench.clear();

        let next = engine.apply(&state, &action(&state, Seat::One, ActionPayload::EndTurn)).unwrap();

        assert_eq!(next.phase, Phase::Finished);
        assert_eq!(next.winner, Some(Seat::One));
        assert!(matches!(
            next.log.back().unwrap().event,
            LogEvent::Victory { reason: WinReason::DeckOut, .. }
        ));
    }

    #[test]
    fn surrender_is_always_admissible() {
        let engine = engine();
        let state = sample::sample_match();
        let next = engine.apply(&state, &action(&state, Seat::Two, ActionPayload::Surrender)).unwrap();
        assert_eq!(next.phase, Phase::Finished);
        assert_eq!(next.winner, Some(Seat::One));
    }

    #[test]
    fn finished_match_rejects_everything() {
        let engine = engine();
        let state = sample::sample_match();
        let done = engine.apply(&state, &action(&state, Seat::Two, ActionPayload::Surrender)).unwrap();
        assert_eq!(
            engine.apply(&done, &action(&done, Seat::One, ActionPayload::EndTurn)),
            Err(Rejection::MatchFinished)
        );
    }

    #[test]
    fn abandon_declares_opponent_winner() {
        let engine = engine();
        let state = sample::sample_match();
        let next = engine.abandon(&state, Seat::One, 5);
        assert_eq!(next.winner, Some(Seat::Two));
        assert!(hash::verify(&next));
        assert_eq!(engine.abandon(&next, Seat::Two, 6), next);
    }

    #[test]
    fn unknown_template_is_rejected() {
        let engine = RulesEngine::new(
            RulesConfig::default(),
            Arc::new(crate::StaticRegistry::from_iter([fighter(10, 4, 5, 3, Rarity::Commune)])),
        );
        let mut state = sample::sample_match();
        state.phase = Phase::Main;
        state.player_mut(Seat::One).energy = 10;
        let card = state.player(Seat::One).hand[0].clone();

        let result = engine.apply(
            &state,
            &action(&state, Seat::One, ActionPayload::SummonFighter { card_id: card.id }),
        );
        assert_eq!(result, Err(Rejection::UnknownFighter(card.template_id)));
    }
}
