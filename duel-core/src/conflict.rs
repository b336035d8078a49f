//! Detection and classification of concurrent actions.

use duelsync_types::{Action, ActionKind, ActionPayload, CardId, ConflictId, ResolutionType};

/// How bad a collision is. Ordered lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Different action kinds touching the same card.
    Low,
    /// Same action kind touching the same card.
    Medium,
    /// An `end_turn` was involved.
    High,
}

impl Severity {
    /// Classify a colliding pair.
    pub fn of(a: &Action, b: &Action) -> Self {
        if a.kind() == ActionKind::EndTurn || b.kind() == ActionKind::EndTurn {
            Severity::High
        } else if a.kind() == b.kind() {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Resolution policy for this severity.
    pub fn resolution(self) -> ResolutionType {
        match self {
            Severity::High => ResolutionType::ServerWins,
            Severity::Medium => ResolutionType::Merge,
            Severity::Low => ResolutionType::ClientWins,
        }
    }
}

/// A detected collision between one incoming action and local ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Identifier echoed in detection and resolution messages.
    pub id: ConflictId,
    /// Worst severity over all colliding pairs.
    pub severity: Severity,
    /// The incoming action.
    pub remote: Action,
    /// Local actions it collided with, oldest first.
    pub local: Vec<Action>,
}

impl Conflict {
    /// Resolution policy for this conflict.
    pub fn resolution(&self) -> ResolutionType {
        self.severity.resolution()
    }
}

/// Finds actions from different seats issued close together that touch the
/// same resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictDetector {
    window_ms: u64,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(500)
    }
}

impl ConflictDetector {
    /// Detector with the given concurrency window.
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms }
    }

    /// The concurrency window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Whether two actions collide.
    pub fn collides(&self, a: &Action, b: &Action) -> bool {
        if a.actor == b.actor || a.timestamp.abs_diff(b.timestamp) > self.window_ms {
            return false;
        }
        if a.kind() == ActionKind::EndTurn || b.kind() == ActionKind::EndTurn {
            return true;
        }
        let theirs = touched(b);
        touched(a).iter().any(|card| theirs.contains(card))
    }

    /// Check an incoming action against recent local ones.
    pub fn detect<'a, I>(&self, incoming: &Action, recent: I) -> Option<Conflict>
    where
        I: IntoIterator<Item = &'a Action>,
    {
        let local: Vec<Action> = recent
            .into_iter()
            .filter(|action| self.collides(incoming, action))
            .cloned()
            .collect();
        let severity = local.iter().map(|action| Severity::of(incoming, action)).max()?;
        Some(Conflict {
            id: ConflictId::new(),
            severity,
            remote: incoming.clone(),
            local,
        })
    }
}

/// Cards an action reads or writes.
fn touched(action: &Action) -> Vec<&CardId> {
    match &action.payload {
        ActionPayload::SummonFighter { card_id } => vec![card_id],
        ActionPayload::Attack {
            attacker_id,
            target_id,
        } => std::iter::once(attacker_id).chain(target_id.as_ref()).collect(),
        ActionPayload::DrawCard | ActionPayload::EndTurn | ActionPayload::Surrender => Vec::new(),
    }
}
