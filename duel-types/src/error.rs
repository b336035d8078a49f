//! Error types for the duelsync wire format.

use thiserror::Error;

use crate::MessageType;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Envelope type disagrees with its payload
    #[error("envelope declares {declared:?} but carries {actual:?}")]
    TypeMismatch {
        /// Type written in the envelope.
        declared: MessageType,
        /// Type of the payload.
        actual: MessageType,
    },

    /// Seat number outside 1..=2
    #[error("invalid seat: {0}")]
    InvalidSeat(u8),

    /// Identifier could not be parsed
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}
