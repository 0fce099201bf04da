//! Single entry point for a presentation layer.
//!
//! A session owns one network and its administrative actions and exposes the
//! calls a front end needs, in the order it would make them.

use crate::admin::{ActionOutcome, AdminActions};
use crate::config::NetworkConfig;
use crate::coordinator::{NetworkCoordinator, RoundResult};
use crate::error::ConfigError;
use crate::events::EventSink;
use crate::types::{NetworkHealth, NodeId, NodeSnapshot, SecurityLevel, VoteValue};
use std::sync::Arc;

#[derive(Debug)]
pub struct ConsensusSession {
    network: NetworkCoordinator,
    admin: AdminActions,
}

impl ConsensusSession {
    pub fn initialize(config: NetworkConfig) -> Result<Self, ConfigError> {
        Ok(ConsensusSession {
            network: NetworkCoordinator::new(config)?,
            admin: AdminActions::new(),
        })
    }

    /// Wrap an existing coordinator, e.g. one built with a simulated transport.
    pub fn from_network(network: NetworkCoordinator) -> Self {
        ConsensusSession {
            network,
            admin: AdminActions::new(),
        }
    }

    pub fn network(&self) -> &NetworkCoordinator {
        &self.network
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.network.subscribe(sink);
    }

    pub fn run_consensus_round(&mut self, value: VoteValue) -> RoundResult {
        self.network.run_consensus_round(value)
    }

    pub fn get_node(&self, id: NodeId) -> Option<NodeSnapshot> {
        self.network.node(id)
    }

    pub fn get_network_health(&self) -> NetworkHealth {
        self.network.network_health()
    }

    pub fn reboot(&mut self, id: NodeId) -> ActionOutcome {
        self.admin.reboot(&mut self.network, id)
    }

    pub fn crash(&mut self, id: NodeId) -> ActionOutcome {
        self.admin.crash(&mut self.network, id)
    }

    pub fn corrupt(&mut self, id: NodeId) -> ActionOutcome {
        self.admin.corrupt(&mut self.network, id)
    }

    pub fn command_door(&mut self, value: VoteValue) -> ActionOutcome {
        self.admin.command_door(&mut self.network, value)
    }

    pub fn exploit_door(&mut self) -> ActionOutcome {
        self.admin.exploit_door(&mut self.network)
    }

    pub fn begin_turn(&mut self) {
        self.admin.begin_turn();
    }

    pub fn refresh_security_level(&mut self) -> SecurityLevel {
        self.network.refresh_security_level()
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.network.security_level()
    }

    pub fn door_state(&self) -> VoteValue {
        self.network.door_state()
    }

    pub fn failsafe_active(&self) -> bool {
        self.network.failsafe_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeHealth;

    #[test]
    fn test_session_round_trip_through_admin() {
        let mut session = ConsensusSession::initialize(NetworkConfig::puzzle(1)).unwrap();
        assert_eq!(session.get_network_health().crashed, 2);
        assert!(!session.run_consensus_round(VoteValue::Open).success);

        assert!(session.reboot(2).success);
        assert!(session.reboot(3).success);
        assert_eq!(session.get_node(3).unwrap().health, NodeHealth::Healthy);

        let result = session.run_consensus_round(VoteValue::Open);
        assert!(result.success);
        assert_eq!(session.door_state(), VoteValue::Open);
        assert_eq!(session.security_level(), SecurityLevel::Maintenance);
    }

    #[test]
    fn test_initialize_rejects_invalid_config() {
        let err = ConsensusSession::initialize(NetworkConfig::with_fault_tolerance(0)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroFaultTolerance);
    }
}
