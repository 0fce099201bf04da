// SHARED VOCABULARY
// Fault-tolerance parameter, node health, vote values and security levels.
//
// SAFETY INVARIANTS:
// 1. N = 3f + 1 and quorum = 2f + 1 for every f >= 1
// 2. Two quorums always intersect in at least f + 1 nodes
// 3. The value-corruption function is a pure negation

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a participant in the fixed roster.
pub type NodeId = usize;

/// The commander never rotates.
pub const COMMANDER_ID: NodeId = 0;

/// Fault-tolerance parameter `f`, fixed when the network is built.
/// Serialized as the bare integer; deserialization rejects zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct FaultTolerance {
    f: usize,
}

impl FaultTolerance {
    /// Create a fault-tolerance parameter. `f` must be at least 1.
    pub fn new(f: usize) -> Result<Self, ConfigError> {
        if f == 0 {
            return Err(ConfigError::ZeroFaultTolerance);
        }
        Ok(FaultTolerance { f })
    }

    /// Maximum number of crashed or Byzantine nodes tolerated.
    pub fn f(&self) -> usize {
        self.f
    }

    /// Total roster size: 3f + 1.
    pub fn total_nodes(&self) -> usize {
        3 * self.f + 1
    }

    /// Agreement required to advance a phase or finalize: 2f + 1.
    pub fn quorum(&self) -> usize {
        2 * self.f + 1
    }

    /// Whether `count` unique agreeing nodes form a quorum.
    pub fn is_quorum(&self, count: usize) -> bool {
        count >= self.quorum()
    }
}

impl TryFrom<usize> for FaultTolerance {
    type Error = ConfigError;

    fn try_from(f: usize) -> Result<Self, Self::Error> {
        FaultTolerance::new(f)
    }
}

impl From<FaultTolerance> for usize {
    fn from(fault: FaultTolerance) -> usize {
        fault.f
    }
}

/// Binary consensus subject: the door-lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VoteValue {
    Open,
    Locked,
}

impl VoteValue {
    pub const ALL: [VoteValue; 2] = [VoteValue::Open, VoteValue::Locked];

    /// The Byzantine value-corruption function.
    pub fn negate(self) -> VoteValue {
        match self {
            VoteValue::Open => VoteValue::Locked,
            VoteValue::Locked => VoteValue::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteValue::Open => "OPEN",
            VoteValue::Locked => "LOCKED",
        }
    }
}

impl fmt::Display for VoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a single node. Transitions are always caller-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeHealth {
    Healthy,
    Crashed,
    Byzantine,
}

impl NodeHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeHealth::Healthy)
    }

    pub fn is_crashed(&self) -> bool {
        matches!(self, NodeHealth::Crashed)
    }

    pub fn is_byzantine(&self) -> bool {
        matches!(self, NodeHealth::Byzantine)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeHealth::Healthy => "HEALTHY",
            NodeHealth::Crashed => "CRASHED",
            NodeHealth::Byzantine => "BYZANTINE",
        }
    }
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational mode derived from aggregate node health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Every node healthy; direct door commands are permitted.
    Maintenance,
    Normal,
    /// Reserved for escalation under repeated attacks. Never entered automatically.
    Defensive,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Maintenance => "MAINTENANCE",
            SecurityLevel::Normal => "NORMAL",
            SecurityLevel::Defensive => "DEFENSIVE",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a round progressed before it completed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    PreCheck,
    PrePrepare,
    Prepare,
    Commit,
    Complete,
}

/// Read-only view of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub health: NodeHealth,
    pub round: u64,
    pub final_decision: Option<VoteValue>,
}

/// Aggregate health of the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHealth {
    pub healthy: usize,
    pub crashed: usize,
    pub byzantine: usize,
    pub total: usize,
    pub f: usize,
    pub required_for_consensus: usize,
}

impl NetworkHealth {
    pub fn from_healths<I>(fault: FaultTolerance, healths: I) -> Self
    where
        I: IntoIterator<Item = NodeHealth>,
    {
        let mut health = NetworkHealth {
            healthy: 0,
            crashed: 0,
            byzantine: 0,
            total: 0,
            f: fault.f(),
            required_for_consensus: fault.quorum(),
        };
        for h in healths {
            health.total += 1;
            match h {
                NodeHealth::Healthy => health.healthy += 1,
                NodeHealth::Crashed => health.crashed += 1,
                NodeHealth::Byzantine => health.byzantine += 1,
            }
        }
        health
    }

    /// Whether enough healthy nodes remain to attempt a round.
    pub fn can_attempt_round(&self) -> bool {
        self.healthy >= self.required_for_consensus
    }
}
