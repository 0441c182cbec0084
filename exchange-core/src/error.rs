//! Error types for exchange operations

use thiserror::Error;

use crate::types::ParticipantId;

/// Errors raised while building or running the exchange.
///
/// None of these are retried: a round either completes in full or leaves
/// every balance untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Location '{0}' is unknown")]
    UnknownLocation(String),
    #[error("No route between '{from}' and '{to}'")]
    NoRoute { from: String, to: String },
    #[error("Location '{0}' already exists")]
    DuplicateLocation(String),
    #[error("Participant {0} is unknown")]
    UnknownParticipant(ParticipantId),
    #[error("Participant {0} already exists")]
    DuplicateParticipant(ParticipantId),
    #[error("Invalid participant record {id}: {reason}")]
    InvalidRecord { id: u32, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Round {round} has no feasible allocation")]
    InfeasibleModel { round: u64 },
    #[error("LP solver unavailable: {0}")]
    SolverUnavailable(String),
}

/// A specialized Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;
