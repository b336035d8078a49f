//! Local store: the one in-memory copy of the match for this client.
//!
//! Holds the current state, a bounded action history and the actions this
//! client applied optimistically but the peer has not yet acknowledged.

use std::collections::VecDeque;

use duelsync_types::{Action, ActionId, ActionPayload, MatchState, Seat, StateHash};

use crate::error::StoreError;
use crate::hash;
use crate::rules::{Rejection, RulesEngine};

/// Default number of actions kept in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// What happened to an incoming remote action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Applied as a new action.
    Applied,
    /// It was one of our pending actions coming back; nothing re-applied.
    Acknowledged,
    /// Already in history; ignored.
    Duplicate,
    /// Refused by the rules engine; state untouched.
    Rejected(Rejection),
}

/// Copy of everything the store owns, for rollback around risky repairs.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    state: MatchState,
    history: VecDeque<Action>,
    pending: Vec<Action>,
    next_sequence: u64,
}

/// Owner of the local match state.
#[derive(Debug)]
pub struct LocalStore {
    engine: RulesEngine,
    seat: Seat,
    state: MatchState,
    history: VecDeque<Action>,
    history_capacity: usize,
    pending: Vec<Action>,
    next_sequence: u64,
}

impl LocalStore {
    /// Create a store for `seat` starting from `state`.
    pub fn new(engine: RulesEngine, seat: Seat, state: MatchState, history_capacity: usize) -> Self {
        Self {
            engine,
            seat,
            state,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            pending: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Current state.
    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Hash of the current state.
    pub fn hash(&self) -> StateHash {
        self.state.state_hash
    }

    /// Seat this store acts for.
    pub fn seat(&self) -> Seat {
        self.seat
    }

    /// The rules engine.
    pub fn engine(&self) -> &RulesEngine {
        &self.engine
    }

    /// Applied actions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Action> {
        self.history.iter()
    }

    /// Most recently applied action.
    pub fn last_action(&self) -> Option<&Action> {
        self.history.back()
    }

    /// Unacknowledged local actions, oldest first.
    pub fn pending(&self) -> &[Action] {
        &self.pending
    }

    /// Whether an action is awaiting acknowledgment.
    pub fn is_pending(&self, id: &ActionId) -> bool {
        self.pending.iter().any(|action| &action.id == id)
    }

    /// Package a payload as the next local action against the current state.
    pub fn next_action(&mut self, payload: ActionPayload, now: u64) -> Action {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Action {
            id: ActionId::new(),
            actor: self.seat,
            payload,
            turn: self.state.turn,
            sequence,
            prev_hash: self.state.state_hash,
            timestamp: now,
        }
    }

    /// Apply one of our own actions optimistically.
    ///
    /// On success the action is in history and pending; the caller sends it.
    pub fn process_local_action(&mut self, action: Action) -> Result<&MatchState, StoreError> {
        let next = self
            .engine
            .apply(&self.state, &action)
            .map_err(|reason| StoreError::Rejected {
                id: action.id,
                reason,
            })?;
        self.state = next;
        self.pending.push(action.clone());
        self.record(action);
        Ok(&self.state)
    }

    /// Apply an action that arrived from the peer.
    ///
    /// An id matching a pending entry is an acknowledgment and is not
    /// re-applied.
    pub fn process_remote_action(&mut self, action: &Action) -> RemoteOutcome {
        if self.acknowledge(&action.id).is_some() {
            return RemoteOutcome::Acknowledged;
        }
        if self.history.iter().any(|known| known.id == action.id) {
            return RemoteOutcome::Duplicate;
        }
        match self.engine.apply(&self.state, action) {
            Ok(next) => {
                self.state = next;
                self.record(action.clone());
                RemoteOutcome::Applied
            }
            Err(reason) => {
                tracing::debug!(action = %action.id, kind = %action.kind(), %reason, "remote action rejected");
                RemoteOutcome::Rejected(reason)
            }
        }
    }

    /// End the current seat's turn on its behalf after its deadline passed.
    ///
    /// The synthesized action goes to history but not to the pending set;
    /// the caller broadcasts it.
    pub fn expire_turn(&mut self, now: u64) -> Result<Action, StoreError> {
        let action = Action {
            id: ActionId::new(),
            actor: self.state.current,
            payload: ActionPayload::EndTurn,
            turn: self.state.turn,
            sequence: 0,
            prev_hash: self.state.state_hash,
            timestamp: now,
        };
        self.state = self
            .engine
            .apply(&self.state, &action)
            .map_err(|reason| StoreError::Rejected {
                id: action.id,
                reason,
            })?;
        self.record(action.clone());
        Ok(action)
    }

    /// Remove an action from the pending set.
    pub fn acknowledge(&mut self, id: &ActionId) -> Option<Action> {
        let index = self.pending.iter().position(|action| &action.id == id)?;
        Some(self.pending.remove(index))
    }

    /// Give up on an optimistic action.
    ///
    /// Intermediate mutations are not unwound. The action is dropped from
    /// the pending set and the caller must request a full sync.
    pub fn rollback(&mut self, id: &ActionId) -> Result<Action, StoreError> {
        let action = self
            .history
            .iter()
            .find(|action| &action.id == id)
            .cloned()
            .ok_or(StoreError::UnknownAction(*id))?;
        self.acknowledge(id);
        tracing::debug!(action = %id, "rollback requested, full sync required");
        Ok(action)
    }

    /// Replace state and history wholesale, discarding every pending action.
    ///
    /// Refuses a state whose stored hash does not match its content.
    pub fn replace(&mut self, state: MatchState, history: Vec<Action>) -> Result<Vec<Action>, StoreError> {
        verify_state(&state)?;
        self.state = state;
        self.history = history.into_iter().collect();
        self.trim_history();
        Ok(std::mem::take(&mut self.pending))
    }

    /// Adopt a repaired state, keeping history, discarding pending actions.
    pub fn adopt(&mut self, state: MatchState) -> Result<Vec<Action>, StoreError> {
        verify_state(&state)?;
        self.state = state;
        Ok(std::mem::take(&mut self.pending))
    }

    /// Adopt `state` as the new basis and replay pending actions on it.
    ///
    /// Actions still admissible stay pending and are returned for
    /// retransmission; the rest are dropped.
    pub fn merge(&mut self, state: MatchState) -> Result<Vec<Action>, StoreError> {
        verify_state(&state)?;
        let pending = std::mem::take(&mut self.pending);
        self.state = state;

        let mut replayed = Vec::new();
        for action in pending {
            let mut action = action;
            action.prev_hash = self.state.state_hash;
            action.turn = self.state.turn;
            match self.engine.apply(&self.state, &action) {
                Ok(next) => {
                    self.state = next;
                    self.history.retain(|known| known.id != action.id);
                    self.record(action.clone());
                    self.pending.push(action.clone());
                    replayed.push(action);
                }
                Err(reason) => {
                    tracing::debug!(action = %action.id, %reason, "pending action dropped during merge");
                    self.history.retain(|known| known.id != action.id);
                }
            }
        }
        Ok(replayed)
    }

    /// Forfeit on behalf of `seat`.
    pub fn abandon(&mut self, seat: Seat, now: u64) -> &MatchState {
        self.state = self.engine.abandon(&self.state, seat, now);
        &self.state
    }

    /// Take a snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            state: self.state.clone(),
            history: self.history.clone(),
            pending: self.pending.clone(),
            next_sequence: self.next_sequence,
        }
    }

    /// Restore a snapshot.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.state = snapshot.state;
        self.history = snapshot.history;
        self.pending = snapshot.pending;
        self.next_sequence = snapshot.next_sequence;
    }

    fn record(&mut self, action: Action) {
        self.history.push_back(action);
        self.trim_history();
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }
}

fn verify_state(state: &MatchState) -> Result<(), StoreError> {
    let actual = hash::compute(state);
    if actual != state.state_hash {
        return Err(StoreError::CorruptState {
            claimed: state.state_hash,
            actual,
        });
    }
    Ok(())
}
