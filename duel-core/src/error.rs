//! Error types for the store and synchronizer.

use thiserror::Error;

use duelsync_types::{ActionId, ConflictId, ResolutionType, StateHash};

use crate::rules::Rejection;

/// Errors from the local store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The rules engine refused the action.
    #[error("action {id} rejected: {reason}")]
    Rejected {
        /// Rejected action.
        id: ActionId,
        /// Why.
        #[source]
        reason: Rejection,
    },

    /// The action is not in the history.
    #[error("action {0} not found in history")]
    UnknownAction(ActionId),

    /// A replacement state's stored hash does not match its content.
    #[error("replacement state hash {claimed} does not match content hash {actual}")]
    CorruptState {
        /// Hash carried by the state.
        claimed: StateHash,
        /// Hash of the content.
        actual: StateHash,
    },
}

/// Errors from the synchronizer's repair protocols.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A repair did not produce the promised hash.
    #[error("hash mismatch after repair: expected {expected}, got {actual}")]
    HashMismatch {
        /// Hash the sender promised.
        expected: StateHash,
        /// Hash actually produced.
        actual: StateHash,
    },

    /// A resolution arrived for a conflict we are not waiting on.
    #[error("conflict {0} is not pending")]
    UnknownConflict(ConflictId),

    /// A resolution that must carry a state did not.
    #[error("{0:?} resolution carries no state")]
    MissingState(ResolutionType),

    /// The store refused the repaired state.
    #[error(transparent)]
    Store(#[from] StoreError),
}
