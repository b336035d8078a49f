//! Incremental state repair.
//!
//! [`generate`] walks the target state and emits the patches that turn the
//! source into it. Each patch is applied by [`apply_one`], which is
//! idempotent, and generation applies every patch it emits to a working copy
//! so positions are computed against what the receiver will actually see.
//!
//! The combat log is not patched; it only travels with a full sync.

use duelsync_types::{
    CardId, CardInstance, MatchState, Seat, StateDiff, StateDiffMessage, StateHash, Zone,
};

use crate::error::SyncError;
use crate::hash;

/// Patches that transform `from` into `to`.
pub fn generate(from: &MatchState, to: &MatchState) -> Vec<StateDiff> {
    let mut work = from.clone();
    let mut diffs = Vec::new();
    let mut emit = |work: &mut MatchState, diff: StateDiff| {
        apply_one(work, &diff);
        diffs.push(diff);
    };

    for seat in Seat::both() {
        let (a, b) = (work.player(seat), to.player(seat));
        if a.hp != b.hp {
            let diff = StateDiff::PlayerHp { seat, hp: b.hp };
            emit(&mut work, diff);
        }
        let (a, b) = (work.player(seat), to.player(seat));
        if a.energy != b.energy || a.max_energy != b.max_energy {
            let diff = StateDiff::PlayerEnergy {
                seat,
                energy: b.energy,
                max_energy: b.max_energy,
            };
            emit(&mut work, diff);
        }
        let (a, b) = (work.player(seat), to.player(seat));
        if a.cards_drawn_this_turn != b.cards_drawn_this_turn
            || a.actions_remaining != b.actions_remaining
        {
            let diff = StateDiff::PlayerCounters {
                seat,
                cards_drawn_this_turn: b.cards_drawn_this_turn,
                actions_remaining: b.actions_remaining,
            };
            emit(&mut work, diff);
        }

        for zone in Zone::ALL {
            for (index, card) in to.player(seat).zone(zone).iter().enumerate() {
                match locate(&work, seat, &card.id) {
                    Some((at, position, current)) if at == zone && position == index => {
                        if current.overlay != card.overlay {
                            let diff = StateDiff::CardUpdated {
                                seat,
                                card_id: card.id.clone(),
                                current_hp: changed(current.overlay.current_hp, card.overlay.current_hp),
                                can_attack: changed(current.overlay.can_attack, card.overlay.can_attack),
                                summoned_this_turn: changed(
                                    current.overlay.summoned_this_turn,
                                    card.overlay.summoned_this_turn,
                                ),
                            };
                            emit(&mut work, diff);
                        }
                    }
                    found => {
                        let diff = StateDiff::CardMoved {
                            seat,
                            card: card.clone(),
                            from: found.map(|(zone, _, _)| zone),
                            to: zone,
                            index,
                        };
                        emit(&mut work, diff);
                    }
                }
            }
        }

        let stale: Vec<CardId> = Zone::ALL
            .iter()
            .flat_map(|zone| work.player(seat).zone(*zone).iter())
            .filter(|card| to.player(seat).find_card(&card.id).is_none())
            .map(|card| card.id.clone())
            .collect();
        for card_id in stale {
            emit(&mut work, StateDiff::CardRemoved { seat, card_id });
        }
    }

    if work.phase != to.phase || work.winner != to.winner {
        let diff = StateDiff::PhaseChange {
            phase: to.phase,
            winner: to.winner,
        };
        emit(&mut work, diff);
    }
    if work.turn != to.turn || work.current != to.current {
        let diff = StateDiff::TurnChange {
            turn: to.turn,
            current: to.current,
        };
        emit(&mut work, diff);
    }
    if work.updated_at != to.updated_at || work.turn_deadline != to.turn_deadline {
        let diff = StateDiff::Timestamp {
            updated_at: to.updated_at,
            turn_deadline: to.turn_deadline,
        };
        emit(&mut work, diff);
    }

    diffs
}

/// Build the wire message repairing `from` into `to`.
pub fn message(from: &MatchState, to: &MatchState) -> StateDiffMessage {
    StateDiffMessage {
        diffs: generate(from, to),
        target_hash: hash::compute(to),
    }
}

/// Apply one patch in place.
pub fn apply_one(state: &mut MatchState, diff: &StateDiff) {
    match diff {
        StateDiff::PlayerHp { seat, hp } => state.player_mut(*seat).hp = *hp,
        StateDiff::PlayerEnergy {
            seat,
            energy,
            max_energy,
        } => {
            let player = state.player_mut(*seat);
            player.energy = *energy;
            player.max_energy = *max_energy;
        }
        StateDiff::PlayerCounters {
            seat,
            cards_drawn_this_turn,
            actions_remaining,
        } => {
            let player = state.player_mut(*seat);
            player.cards_drawn_this_turn = *cards_drawn_this_turn;
            player.actions_remaining = *actions_remaining;
        }
        StateDiff::CardMoved {
            seat,
            card,
            to,
            index,
            ..
        } => {
            remove_card(state, *seat, &card.id);
            let mut card = card.clone();
            card.zone = *to;
            let zone = state.player_mut(*seat).zone_mut(*to);
            let index = (*index).min(zone.len());
            zone.insert(index, card);
        }
        StateDiff::CardRemoved { seat, card_id } => {
            remove_card(state, *seat, card_id);
        }
        StateDiff::CardUpdated {
            seat,
            card_id,
            current_hp,
            can_attack,
            summoned_this_turn,
        } => {
            let player = state.player_mut(*seat);
            let card = Zone::ALL
                .into_iter()
                .find_map(|zone| player.zone(zone).iter().position(|c| &c.id == card_id).map(|i| (zone, i)));
            if let Some((zone, i)) = card {
                let overlay = &mut player.zone_mut(zone)[i].overlay;
                if let Some(hp) = current_hp {
                    overlay.current_hp = *hp;
                }
                if let Some(flag) = can_attack {
                    overlay.can_attack = *flag;
                }
                if let Some(flag) = summoned_this_turn {
                    overlay.summoned_this_turn = *flag;
                }
            }
        }
        StateDiff::PhaseChange { phase, winner } => {
            state.phase = *phase;
            state.winner = *winner;
        }
        StateDiff::TurnChange { turn, current } => {
            state.turn = *turn;
            state.current = *current;
        }
        StateDiff::Timestamp {
            updated_at,
            turn_deadline,
        } => {
            state.updated_at = *updated_at;
            state.turn_deadline = *turn_deadline;
        }
    }
}

/// Apply a diff message to a copy of `state` and check the result.
///
/// Returns the patched state only when its hash equals the target.
pub fn apply(state: &MatchState, message: &StateDiffMessage) -> Result<MatchState, SyncError> {
    let mut next = state.clone();
    for diff in &message.diffs {
        apply_one(&mut next, diff);
    }
    let actual: StateHash = hash::refresh(&mut next);
    if actual != message.target_hash {
        return Err(SyncError::HashMismatch {
            expected: message.target_hash,
            actual,
        });
    }
    Ok(next)
}

fn changed<T: PartialEq + Copy>(current: T, target: T) -> Option<T> {
    (current != target).then_some(target)
}

fn locate<'a>(state: &'a MatchState, seat: Seat, id: &CardId) -> Option<(Zone, usize, &'a CardInstance)> {
    let player = state.player(seat);
    Zone::ALL.into_iter().find_map(|zone| {
        player
            .zone(zone)
            .iter()
            .position(|card| &card.id == id)
            .map(|index| (zone, index, &player.zone(zone)[index]))
    })
}

fn remove_card(state: &mut MatchState, seat: Seat, id: &CardId) {
    let player = state.player_mut(seat);
    for zone in Zone::ALL {
        player.zone_mut(zone).retain(|card| &card.id != id);
    }
}
