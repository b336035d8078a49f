//! A greedy bot that picks one admissible move at a time.

use duelsync_core::{summon_cost, RulesEngine};
use duelsync_types::{Action, ActionId, ActionPayload, CardInstance, MatchState, Phase, Seat};

/// Choose the next move for `seat`.
///
/// Draw when drawing is due, summon the cheapest affordable fighter, attack
/// the weakest defender with every ready fighter, then pass. Every choice
/// is checked against the rules, so the result is admissible unless the
/// state changes before it is played.
pub fn next_move(engine: &RulesEngine, state: &MatchState, seat: Seat) -> ActionPayload {
    match state.phase {
        Phase::Draw => ActionPayload::DrawCard,
        Phase::Main => summon(engine, state, seat).unwrap_or(ActionPayload::EndTurn),
        Phase::Combat => attack(engine, state, seat).unwrap_or(ActionPayload::EndTurn),
        Phase::Setup | Phase::Finished => ActionPayload::EndTurn,
    }
}

fn summon(engine: &RulesEngine, state: &MatchState, seat: Seat) -> Option<ActionPayload> {
    let mut hand: Vec<(u32, &CardInstance)> = state
        .player(seat)
        .hand
        .iter()
        .filter_map(|card| {
            let template = engine.registry().lookup(card.template_id)?;
            Some((summon_cost(template), card))
        })
        .collect();
    hand.sort_by_key(|(cost, _)| *cost);

    hand.into_iter()
        .map(|(_, card)| ActionPayload::SummonFighter {
            card_id: card.id.clone(),
        })
        .find(|payload| admissible(engine, state, seat, payload))
}

fn attack(engine: &RulesEngine, state: &MatchState, seat: Seat) -> Option<ActionPayload> {
    let target_id = state
        .player(seat.opponent())
        .field
        .iter()
        .min_by_key(|card| card.overlay.current_hp)
        .map(|card| card.id.clone());

    state
        .player(seat)
        .field
        .iter()
        .filter(|card| card.overlay.can_attack)
        .map(|card| ActionPayload::Attack {
            attacker_id: card.id.clone(),
            target_id: target_id.clone(),
        })
        .find(|payload| admissible(engine, state, seat, payload))
}

fn admissible(engine: &RulesEngine, state: &MatchState, seat: Seat, payload: &ActionPayload) -> bool {
    let candidate = Action {
        id: ActionId::new(),
        actor: seat,
        payload: payload.clone(),
        turn: state.turn,
        sequence: 0,
        prev_hash: state.state_hash,
        timestamp: state.updated_at,
    };
    engine.validate(state, &candidate).is_ok()
}
