//! Static fighter registry and the summon cost formula.
//!
//! Templates are read-only. Card instances reference them by id and keep
//! their mutable combat state in an overlay, so nothing here is ever copied
//! and mutated.

use std::collections::HashMap;
use std::sync::Arc;

use duelsync_types::{FighterId, FighterTemplate, Rarity};

/// Highest energy cost any fighter can have.
pub const MAX_COST: u32 = 10;

/// Read-only lookup of fighter templates.
///
/// Supplied by the collection service; the core never writes to it.
pub trait FighterRegistry: Send + Sync {
    /// Find the template for a fighter id.
    fn lookup(&self, id: FighterId) -> Option<&FighterTemplate>;
}

impl<R: FighterRegistry + ?Sized> FighterRegistry for Arc<R> {
    fn lookup(&self, id: FighterId) -> Option<&FighterTemplate> {
        (**self).lookup(id)
    }
}

/// In-memory registry backed by a hash map.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    fighters: HashMap<FighterId, FighterTemplate>,
}

impl StaticRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.fighters.len()
    }

    /// Whether the registry has no templates.
    pub fn is_empty(&self) -> bool {
        self.fighters.is_empty()
    }
}

impl FromIterator<FighterTemplate> for StaticRegistry {
    fn from_iter<I: IntoIterator<Item = FighterTemplate>>(iter: I) -> Self {
        Self {
            fighters: iter.into_iter().map(|t| (t.id, t)).collect(),
        }
    }
}

impl FighterRegistry for StaticRegistry {
    fn lookup(&self, id: FighterId) -> Option<&FighterTemplate> {
        self.fighters.get(&id)
    }
}

/// Energy needed to summon a fighter.
///
/// `floor((force + pv + endurance + vitesse) / 50)`, raised to a rarity
/// floor, then capped at [`MAX_COST`].
pub fn summon_cost(template: &FighterTemplate) -> u32 {
    let total = template
        .force
        .saturating_add(template.pv)
        .saturating_add(template.endurance)
        .saturating_add(template.vitesse);
    let base = total / 50;
    let by_rarity = match template.rarity {
        Rarity::Commune => base.saturating_sub(1).max(1),
        Rarity::Rare => base.max(2),
        Rarity::Epique => (base + 1).max(3),
        Rarity::Legendaire => (base + 2).max(4),
    };
    by_rarity.min(MAX_COST)
}
