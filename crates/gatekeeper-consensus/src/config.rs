use crate::error::ConfigError;
use crate::types::{FaultTolerance, NodeId, VoteValue};
use serde::{Deserialize, Serialize};

/// Consecutive failed rounds after which the failsafe unlocks.
pub const DEFAULT_FAILSAFE_THRESHOLD: u32 = 10;

/// How a Byzantine commander picks the value for each lieutenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommanderEquivocation {
    /// Independent coin flip per recipient between the true and the negated value,
    /// drawn from the seeded network RNG.
    Random,
    /// Every recipient receives the negated value.
    Negate,
}

/// Parameters fixed when the network is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Fault-tolerance parameter `f`; the roster has 3f + 1 nodes.
    pub fault_tolerance: usize,

    /// Consecutive failed rounds that permanently activate the failsafe.
    pub failsafe_threshold: u32,

    /// Seed for every RNG the network owns.
    pub seed: u64,

    /// Nodes that start Crashed (scenario setup).
    pub crashed_at_start: Vec<NodeId>,

    pub commander_equivocation: CommanderEquivocation,

    /// When false, only a Crashed commander fails pre-check; a Byzantine
    /// commander is allowed to broadcast.
    pub require_healthy_commander: bool,

    pub initial_door_state: VoteValue,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            fault_tolerance: 1,
            failsafe_threshold: DEFAULT_FAILSAFE_THRESHOLD,
            seed: 0,
            crashed_at_start: Vec::new(),
            commander_equivocation: CommanderEquivocation::Random,
            require_healthy_commander: true,
            initial_door_state: VoteValue::Locked,
        }
    }
}

impl NetworkConfig {
    /// Fully healthy network with the given `f`.
    pub fn with_fault_tolerance(f: usize) -> Self {
        NetworkConfig {
            fault_tolerance: f,
            ..Default::default()
        }
    }

    /// Session layout used by the puzzle: nodes 0..=f start healthy, the rest crashed.
    pub fn puzzle(f: usize) -> Self {
        Self::with_fault_tolerance(f).into_puzzle()
    }

    /// Replace the crash set with the puzzle layout, keeping every other field.
    pub fn into_puzzle(mut self) -> Self {
        let f = self.fault_tolerance;
        self.crashed_at_start = ((f + 1)..(3 * f + 1)).collect();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn crashed(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.crashed_at_start.extend(ids);
        self
    }

    /// Check the configuration and return the derived fault-tolerance parameter.
    pub fn validate(&self) -> Result<FaultTolerance, ConfigError> {
        let fault = FaultTolerance::new(self.fault_tolerance)?;
        if self.failsafe_threshold == 0 {
            return Err(ConfigError::ZeroFailsafeThreshold);
        }
        let total = fault.total_nodes();
        if let Some(&id) = self.crashed_at_start.iter().find(|&&id| id >= total) {
            return Err(ConfigError::UnknownNode { id, total });
        }
        Ok(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NetworkConfig::default();
        let fault = config.validate().unwrap();
        assert_eq!(fault.total_nodes(), 4);
        assert_eq!(config.failsafe_threshold, 10);
        assert_eq!(config.initial_door_state, VoteValue::Locked);
    }

    #[test]
    fn test_puzzle_layout_crashes_nodes_beyond_f() {
        let config = NetworkConfig::puzzle(2);
        assert_eq!(config.crashed_at_start, vec![3, 4, 5, 6]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_into_puzzle_keeps_other_fields() {
        let config = NetworkConfig {
            fault_tolerance: 1,
            failsafe_threshold: 3,
            seed: 42,
            require_healthy_commander: false,
            ..Default::default()
        }
        .crashed([1])
        .into_puzzle();
        assert_eq!(config.crashed_at_start, vec![2, 3]);
        assert_eq!(config.failsafe_threshold, 3);
        assert_eq!(config.seed, 42);
        assert!(!config.require_healthy_commander);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_f = NetworkConfig::with_fault_tolerance(0);
        assert_eq!(zero_f.validate(), Err(ConfigError::ZeroFaultTolerance));

        let zero_threshold = NetworkConfig {
            failsafe_threshold: 0,
            ..Default::default()
        };
        assert_eq!(zero_threshold.validate(), Err(ConfigError::ZeroFailsafeThreshold));

        let unknown = NetworkConfig::default().crashed([4]);
        assert_eq!(
            unknown.validate(),
            Err(ConfigError::UnknownNode { id: 4, total: 4 })
        );
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: NetworkConfig =
            serde_json::from_str(r#"{"fault_tolerance": 2, "commander_equivocation": "negate"}"#)
                .unwrap();
        assert_eq!(config.fault_tolerance, 2);
        assert_eq!(config.commander_equivocation, CommanderEquivocation::Negate);
        assert_eq!(config.failsafe_threshold, DEFAULT_FAILSAFE_THRESHOLD);
        assert!(config.require_healthy_commander);
    }
}
