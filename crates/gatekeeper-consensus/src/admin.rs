// ADMIN ACTIONS
// Fault injection, door overrides and rule-based attack detection
//
// SAFETY INVARIANTS:
// 1. A rejected action never mutates network state
// 2. Attack detection is advisory; it never blocks an action
// 3. Detection is deterministic (same action log and roster -> same signals)
// 4. The action log resets per turn, independent of consensus rounds

use crate::coordinator::NetworkCoordinator;
use crate::error::AdminError;
use crate::events::{ConsensusEvent, DoorChangeCause};
use crate::types::{NodeHealth, NodeId, SecurityLevel, VoteValue, COMMANDER_ID};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// One rule that fired in attack detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackSignal {
    /// Two or more crashes within one turn.
    RepeatedCrashes { count: usize },

    /// Two or more corruptions within one turn.
    RepeatedCorruptions { count: usize },

    /// More Byzantine nodes than the network tolerates.
    ByzantineBeyondTolerance { byzantine: usize, f: usize },

    /// The commander was crashed or corrupted this turn.
    CommanderTargeted,
}

impl AttackSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackSignal::RepeatedCrashes { .. } => "REPEATED_CRASHES",
            AttackSignal::RepeatedCorruptions { .. } => "REPEATED_CORRUPTIONS",
            AttackSignal::ByzantineBeyondTolerance { .. } => "BYZANTINE_BEYOND_TOLERANCE",
            AttackSignal::CommanderTargeted => "COMMANDER_TARGETED",
        }
    }
}

/// How the door was opened outside consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoorOverride {
    /// Authorized command while every node was healthy.
    Restoration,
    /// Forced open through the failsafe.
    Sabotage,
}

/// Crash and corrupt targets recorded during the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLog {
    pub crashes: Vec<NodeId>,
    pub corrupts: Vec<NodeId>,
}

impl ActionLog {
    pub fn clear(&mut self) {
        self.crashes.clear();
        self.corrupts.clear();
    }

    pub fn targets(&self, id: NodeId) -> bool {
        self.crashes.contains(&id) || self.corrupts.contains(&id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub attack_detected: bool,
    pub attack_signals: Vec<AttackSignal>,
    pub nodes_affected: Vec<NodeId>,
    pub door_opened: bool,
    pub door_override: Option<DoorOverride>,
    pub rejection: Option<AdminError>,
}

impl ActionOutcome {
    fn applied(message: String, nodes_affected: Vec<NodeId>) -> Self {
        ActionOutcome {
            success: true,
            message,
            attack_detected: false,
            attack_signals: Vec::new(),
            nodes_affected,
            door_opened: false,
            door_override: None,
            rejection: None,
        }
    }

    fn rejected(error: AdminError) -> Self {
        ActionOutcome {
            success: false,
            message: error.to_string(),
            attack_detected: false,
            attack_signals: Vec::new(),
            nodes_affected: Vec::new(),
            door_opened: false,
            door_override: None,
            rejection: Some(error),
        }
    }

    fn with_signals(mut self, signals: Vec<AttackSignal>) -> Self {
        self.attack_detected = !signals.is_empty();
        self.attack_signals = signals;
        self
    }
}

/// Administrative entry points applied between rounds.
#[derive(Debug, Clone, Default)]
pub struct AdminActions {
    log: ActionLog,
}

impl AdminActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.log
    }

    /// Start a new turn: forget this turn's crash and corrupt targets.
    pub fn begin_turn(&mut self) {
        self.log.clear();
    }

    fn check_node(net: &NetworkCoordinator, id: NodeId) -> Result<NodeHealth, AdminError> {
        net.node(id)
            .map(|snapshot| snapshot.health)
            .ok_or(AdminError::InvalidNode {
                id,
                total: net.fault().total_nodes(),
            })
    }

    /// Bring a Crashed node back as Healthy. Never counted as an attack.
    pub fn reboot(&mut self, net: &mut NetworkCoordinator, id: NodeId) -> ActionOutcome {
        let health = match Self::check_node(net, id) {
            Ok(health) => health,
            Err(e) => return ActionOutcome::rejected(e),
        };
        if !health.is_crashed() {
            return ActionOutcome::rejected(AdminError::NotCrashed { id });
        }
        net.set_node_health(id, NodeHealth::Healthy);
        ActionOutcome::applied(format!("Node {} rebooted", id), vec![id])
    }

    pub fn crash(&mut self, net: &mut NetworkCoordinator, id: NodeId) -> ActionOutcome {
        let health = match Self::check_node(net, id) {
            Ok(health) => health,
            Err(e) => return ActionOutcome::rejected(e),
        };
        if health.is_crashed() {
            return ActionOutcome::rejected(AdminError::AlreadyCrashed { id });
        }
        net.set_node_health(id, NodeHealth::Crashed);
        self.log.crashes.push(id);

        let signals = self.report_attack(net);
        ActionOutcome::applied(format!("Node {} crashed", id), vec![id]).with_signals(signals)
    }

    pub fn corrupt(&mut self, net: &mut NetworkCoordinator, id: NodeId) -> ActionOutcome {
        let health = match Self::check_node(net, id) {
            Ok(health) => health,
            Err(e) => return ActionOutcome::rejected(e),
        };
        if !health.is_healthy() {
            return ActionOutcome::rejected(AdminError::NotHealthy { id, health });
        }
        net.set_node_health(id, NodeHealth::Byzantine);
        self.log.corrupts.push(id);

        let signals = self.report_attack(net);
        ActionOutcome::applied(format!("Node {} corrupted", id), vec![id]).with_signals(signals)
    }

    /// Set the door directly. Only permitted at Maintenance level.
    pub fn command_door(
        &mut self,
        net: &mut NetworkCoordinator,
        value: VoteValue,
    ) -> ActionOutcome {
        let level = net.security_level();
        if level != SecurityLevel::Maintenance {
            return ActionOutcome::rejected(AdminError::NotInMaintenance { level });
        }
        net.set_door_state(value, DoorChangeCause::Command);

        let mut outcome = ActionOutcome::applied(format!("door commanded {}", value), Vec::new());
        if value == VoteValue::Open {
            info!("door opened by authorized command");
            outcome.door_opened = true;
            outcome.door_override = Some(DoorOverride::Restoration);
        }
        outcome
    }

    /// Force the door open. Only permitted once the failsafe is active.
    pub fn exploit_door(&mut self, net: &mut NetworkCoordinator) -> ActionOutcome {
        if !net.failsafe_active() {
            return ActionOutcome::rejected(AdminError::FailsafeInactive {
                failed_rounds: net.failed_rounds(),
                threshold: net.failsafe_threshold(),
            });
        }
        warn!("door forced open through the failsafe");
        net.set_door_state(VoteValue::Open, DoorChangeCause::Exploit);

        let mut outcome =
            ActionOutcome::applied("door forced OPEN via failsafe".to_string(), Vec::new());
        outcome.door_opened = true;
        outcome.door_override = Some(DoorOverride::Sabotage);
        outcome
    }

    /// Evaluate every detection rule against this turn's log and the roster.
    pub fn detect_attack(&self, net: &NetworkCoordinator) -> Vec<AttackSignal> {
        let mut signals = Vec::new();

        if self.log.crashes.len() >= 2 {
            signals.push(AttackSignal::RepeatedCrashes {
                count: self.log.crashes.len(),
            });
        }
        if self.log.corrupts.len() >= 2 {
            signals.push(AttackSignal::RepeatedCorruptions {
                count: self.log.corrupts.len(),
            });
        }

        let health = net.network_health();
        if health.byzantine > health.f {
            signals.push(AttackSignal::ByzantineBeyondTolerance {
                byzantine: health.byzantine,
                f: health.f,
            });
        }

        if self.log.targets(COMMANDER_ID) {
            signals.push(AttackSignal::CommanderTargeted);
        }

        signals
    }

    fn report_attack(&self, net: &NetworkCoordinator) -> Vec<AttackSignal> {
        let signals = self.detect_attack(net);
        if !signals.is_empty() {
            let names: Vec<&str> = signals.iter().map(AttackSignal::as_str).collect();
            warn!("ATTACK DETECTED: {}", names.join(", "));
            net.publish(ConsensusEvent::AttackDetected {
                signals: signals.clone(),
            });
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn network(f: usize) -> NetworkCoordinator {
        NetworkCoordinator::new(NetworkConfig::with_fault_tolerance(f)).unwrap()
    }

    #[test]
    fn test_reboot_requires_crashed_target() {
        let mut net = network(1);
        let mut admin = AdminActions::new();

        let rejected = admin.reboot(&mut net, 1);
        assert!(!rejected.success);
        assert_eq!(rejected.rejection, Some(AdminError::NotCrashed { id: 1 }));

        admin.crash(&mut net, 1);
        let rebooted = admin.reboot(&mut net, 1);
        assert!(rebooted.success);
        assert!(!rebooted.attack_detected);
        assert_eq!(net.node(1).unwrap().health, NodeHealth::Healthy);
    }

    #[test]
    fn test_invalid_node_is_rejected_without_mutation() {
        let mut net = network(1);
        let mut admin = AdminActions::new();
        let outcome = admin.crash(&mut net, 9);
        assert_eq!(
            outcome.rejection,
            Some(AdminError::InvalidNode { id: 9, total: 4 })
        );
        assert!(admin.action_log().crashes.is_empty());
        assert_eq!(net.network_health().healthy, 4);
    }

    #[test]
    fn test_corrupt_requires_healthy_target() {
        let mut net = network(1);
        let mut admin = AdminActions::new();
        assert!(admin.corrupt(&mut net, 2).success);
        let again = admin.corrupt(&mut net, 2);
        assert_eq!(
            again.rejection,
            Some(AdminError::NotHealthy {
                id: 2,
                health: NodeHealth::Byzantine
            })
        );
    }

    #[test]
    fn test_two_crashes_in_one_turn_is_an_attack() {
        let mut net = network(2);
        let mut admin = AdminActions::new();
        assert!(!admin.crash(&mut net, 3).attack_detected);
        let second = admin.crash(&mut net, 4);
        assert!(second.attack_detected);
        assert_eq!(
            second.attack_signals,
            vec![AttackSignal::RepeatedCrashes { count: 2 }]
        );

        admin.begin_turn();
        assert!(admin.detect_attack(&net).is_empty());
    }

    #[test]
    fn test_commander_target_is_an_attack() {
        let mut net = network(1);
        let mut admin = AdminActions::new();
        let outcome = admin.corrupt(&mut net, COMMANDER_ID);
        assert!(outcome.success);
        assert!(outcome.attack_signals.contains(&AttackSignal::CommanderTargeted));
    }

    #[test]
    fn test_byzantine_beyond_tolerance_across_turns() {
        let mut net = network(1);
        let mut admin = AdminActions::new();
        assert!(!admin.corrupt(&mut net, 1).attack_detected);
        admin.begin_turn();
        let outcome = admin.corrupt(&mut net, 2);
        assert_eq!(
            outcome.attack_signals,
            vec![AttackSignal::ByzantineBeyondTolerance { byzantine: 2, f: 1 }]
        );
    }

    #[test]
    fn test_command_door_requires_maintenance() {
        let mut net = network(1);
        let mut admin = AdminActions::new();
        let rejected = admin.command_door(&mut net, VoteValue::Open);
        assert_eq!(
            rejected.rejection,
            Some(AdminError::NotInMaintenance {
                level: SecurityLevel::Normal
            })
        );
        assert_eq!(net.door_state(), VoteValue::Locked);

        net.refresh_security_level();
        let opened = admin.command_door(&mut net, VoteValue::Open);
        assert!(opened.success);
        assert!(opened.door_opened);
        assert_eq!(opened.door_override, Some(DoorOverride::Restoration));
        assert_eq!(net.door_state(), VoteValue::Open);
    }

    #[test]
    fn test_exploit_requires_failsafe() {
        let mut net = network(1);
        let mut admin = AdminActions::new();
        let rejected = admin.exploit_door(&mut net);
        assert_eq!(
            rejected.rejection,
            Some(AdminError::FailsafeInactive {
                failed_rounds: 0,
                threshold: 10
            })
        );

        admin.crash(&mut net, COMMANDER_ID);
        for _ in 0..10 {
            net.run_consensus_round(VoteValue::Locked);
        }
        let exploited = admin.exploit_door(&mut net);
        assert!(exploited.success);
        assert_eq!(exploited.door_override, Some(DoorOverride::Sabotage));
        assert_eq!(net.door_state(), VoteValue::Open);
    }
}
