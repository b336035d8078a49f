//! Canonical state hashing.
//!
//! The hash covers an order-independent projection of the match: for each
//! seat, hit points, energy, hand size, graveyard size and the field cards
//! sorted by id (id, template, current hp, attack flag, zone). Anything not
//! in the projection (log, counters, bench order, timestamps) does not
//! affect the hash.
//!
//! Encoding is a fixed little-endian layout fed to BLAKE3 behind a domain
//! tag. Both sides of a match must agree bit for bit, so there is exactly
//! one algorithm and no fallback.

use duelsync_types::{CardInstance, MatchState, PlayerState, Seat, StateHash, Zone};

const DOMAIN: &[u8] = b"duelsync-state-v1:";

/// Compute the canonical hash of a state.
pub fn compute(state: &MatchState) -> StateHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN);
    hasher.update(&canonical_bytes(state));
    StateHash::from_bytes(*hasher.finalize().as_bytes())
}

/// Recompute and store the hash on a state. Returns the new hash.
pub fn refresh(state: &mut MatchState) -> StateHash {
    let hash = compute(state);
    state.state_hash = hash;
    hash
}

/// Whether the stored hash matches the state's content.
pub fn verify(state: &MatchState) -> bool {
    compute(state) == state.state_hash
}

/// Serialize the canonical projection.
pub fn canonical_bytes(state: &MatchState) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    for seat in Seat::both() {
        encode_player(&mut buf, state.player(seat));
    }
    buf
}

fn encode_player(buf: &mut Vec<u8>, player: &PlayerState) {
    buf.extend_from_slice(&player.hp.to_le_bytes());
    buf.extend_from_slice(&player.energy.to_le_bytes());
    buf.extend_from_slice(&(player.hand.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(player.graveyard.len() as u32).to_le_bytes());

    let mut field: Vec<&CardInstance> = player.field.iter().collect();
    field.sort_by(|a, b| a.id.cmp(&b.id));
    buf.extend_from_slice(&(field.len() as u32).to_le_bytes());
    for card in field {
        encode_card(buf, card);
    }
}

fn encode_card(buf: &mut Vec<u8>, card: &CardInstance) {
    let id = card.id.as_str().as_bytes();
    buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
    buf.extend_from_slice(id);
    buf.extend_from_slice(&card.template_id.value().to_le_bytes());
    buf.extend_from_slice(&card.overlay.current_hp.to_le_bytes());
    buf.push(u8::from(card.overlay.can_attack));
    buf.push(zone_tag(card.zone));
}

fn zone_tag(zone: Zone) -> u8 {
    match zone {
        Zone::Hand => 0,
        Zone::Field => 1,
        Zone::Bench => 2,
        Zone::Graveyard => 3,
    }
}
