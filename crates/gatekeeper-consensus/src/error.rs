// ERROR TAXONOMY
// Every failure in this crate is an expected outcome represented as a value.
//
// SAFETY: Rejections never mutate state. Callers receive the error inside an
// ActionOutcome or RoundResult; nothing here is fatal to the host process.

use crate::types::{NodeHealth, NodeId, SecurityLevel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("fault tolerance must be at least 1")]
    ZeroFaultTolerance,

    #[error("failsafe threshold must be at least 1")]
    ZeroFailsafeThreshold,

    #[error("node {id} does not exist in a network of {total} nodes")]
    UnknownNode { id: NodeId, total: usize },
}

/// Precondition violations for administrative actions.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AdminError {
    #[error("invalid node id {id} (network has {total} nodes)")]
    InvalidNode { id: NodeId, total: usize },

    #[error("node {id} is not crashed")]
    NotCrashed { id: NodeId },

    #[error("node {id} is already crashed")]
    AlreadyCrashed { id: NodeId },

    #[error("node {id} must be healthy to corrupt (currently {health})")]
    NotHealthy { id: NodeId, health: NodeHealth },

    #[error("must be at MAINTENANCE level to command the door (currently {level})")]
    NotInMaintenance { level: SecurityLevel },

    #[error("failsafe not active ({failed_rounds}/{threshold} failed rounds)")]
    FailsafeInactive { failed_rounds: u32, threshold: u32 },
}

/// Why a consensus round did not produce a global decision.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RoundFailure {
    #[error("insufficient healthy nodes ({healthy} < {required})")]
    InsufficientHealthyNodes { healthy: usize, required: usize },

    #[error("commander not healthy (currently {health})")]
    CommanderNotHealthy { health: NodeHealth },

    #[error("no consensus reached (open={open}, locked={locked}, undecided={undecided})")]
    NoConsensus {
        open: usize,
        locked: usize,
        undecided: usize,
    },
}

impl RoundFailure {
    /// Whether the round was rejected before any message was sent.
    pub fn is_pre_check(&self) -> bool {
        !matches!(self, RoundFailure::NoConsensus { .. })
    }
}
