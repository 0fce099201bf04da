//! Scripted sessions that walk the network through its three endings:
//! restoring full health, an escalating Byzantine attack, and sabotage through
//! the failsafe.

use crate::admin::ActionOutcome;
use crate::config::NetworkConfig;
use crate::coordinator::RoundResult;
use crate::error::ConfigError;
use crate::events::EventSink;
use crate::session::ConsensusSession;
use crate::types::{NodeId, SecurityLevel, VoteValue, COMMANDER_ID};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScenarioStep {
    Action { label: String, outcome: ActionOutcome },
    Round { result: RoundResult },
    SecurityLevel { level: SecurityLevel },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub steps: Vec<ScenarioStep>,
    pub final_door_state: VoteValue,
    pub failsafe_active: bool,
    pub security_level: SecurityLevel,
}

impl ScenarioReport {
    pub fn rounds(&self) -> impl Iterator<Item = &RoundResult> {
        self.steps.iter().filter_map(|step| match step {
            ScenarioStep::Round { result } => Some(result),
            _ => None,
        })
    }

    pub fn actions(&self) -> impl Iterator<Item = (&str, &ActionOutcome)> {
        self.steps.iter().filter_map(|step| match step {
            ScenarioStep::Action { label, outcome } => Some((label.as_str(), outcome)),
            _ => None,
        })
    }
}

struct Script {
    name: &'static str,
    session: ConsensusSession,
    steps: Vec<ScenarioStep>,
}

impl Script {
    fn new(
        name: &'static str,
        config: NetworkConfig,
        sinks: &[Arc<dyn EventSink>],
    ) -> Result<Self, ConfigError> {
        info!("scenario {}: f={}", name, config.fault_tolerance);
        let mut session = ConsensusSession::initialize(config)?;
        for sink in sinks {
            session.subscribe(Arc::clone(sink));
        }
        Ok(Script {
            name,
            session,
            steps: Vec::new(),
        })
    }

    fn action(&mut self, label: String, outcome: ActionOutcome) {
        info!("{}: {} -> {}", self.name, label, outcome.message);
        self.steps.push(ScenarioStep::Action { label, outcome });
    }

    fn round(&mut self, value: VoteValue) {
        let result = self.session.run_consensus_round(value);
        self.steps.push(ScenarioStep::Round { result });
    }

    fn reboot_all(&mut self, ids: &[NodeId]) {
        for &id in ids {
            let outcome = self.session.reboot(id);
            self.action(format!("reboot {}", id), outcome);
        }
    }

    fn finish(self) -> ScenarioReport {
        ScenarioReport {
            name: self.name.to_string(),
            final_door_state: self.session.door_state(),
            failsafe_active: self.session.failsafe_active(),
            security_level: self.session.security_level(),
            steps: self.steps,
        }
    }
}

/// Reboot every crashed node, agree on OPEN, then open the door by command.
///
/// Every scenario lays the puzzle crash set over `config` and subscribes
/// `sinks` before the first action.
pub fn restoration(
    config: NetworkConfig,
    sinks: &[Arc<dyn EventSink>],
) -> Result<ScenarioReport, ConfigError> {
    let config = config.into_puzzle();
    let crashed = config.crashed_at_start.clone();
    let mut script = Script::new("restoration", config, sinks)?;

    script.reboot_all(&crashed);
    let level = script.session.refresh_security_level();
    script.steps.push(ScenarioStep::SecurityLevel { level });

    script.round(VoteValue::Open);
    let outcome = script.session.command_door(VoteValue::Open);
    script.action("command door OPEN".to_string(), outcome);
    Ok(script.finish())
}

/// Corrupt lieutenants 1..=f+1 in successive turns with a round after each.
/// The last corruption exceeds the tolerance and the round after it fails.
pub fn byzantine_attack(
    config: NetworkConfig,
    sinks: &[Arc<dyn EventSink>],
) -> Result<ScenarioReport, ConfigError> {
    let config = config.into_puzzle();
    let crashed = config.crashed_at_start.clone();
    let targets = 1..=config.fault_tolerance + 1;
    let mut script = Script::new("byzantine_attack", config, sinks)?;

    script.reboot_all(&crashed);
    script.round(VoteValue::Open);

    let proposals = [VoteValue::Locked, VoteValue::Open].into_iter().cycle();
    for (target, proposal) in targets.zip(proposals) {
        script.session.begin_turn();
        let outcome = script.session.corrupt(target);
        script.action(format!("corrupt {}", target), outcome);
        script.round(proposal);
    }
    Ok(script.finish())
}

/// Crash the commander, let rounds fail until the failsafe activates, then
/// force the door.
pub fn sabotage(
    config: NetworkConfig,
    sinks: &[Arc<dyn EventSink>],
) -> Result<ScenarioReport, ConfigError> {
    let config = config.into_puzzle();
    let threshold = config.failsafe_threshold;
    let mut script = Script::new("sabotage", config, sinks)?;

    script.session.begin_turn();
    let outcome = script.session.crash(COMMANDER_ID);
    script.action(format!("crash {}", COMMANDER_ID), outcome);

    for _ in 0..threshold {
        script.round(VoteValue::Open);
        if script.session.failsafe_active() {
            break;
        }
    }

    let outcome = script.session.exploit_door();
    script.action("exploit door".to_string(), outcome);
    Ok(script.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{AttackSignal, DoorOverride};
    use crate::error::RoundFailure;
    use crate::events::{ConsensusEvent, MemorySink};

    #[test]
    fn test_restoration_opens_by_command() {
        let report = restoration(NetworkConfig::with_fault_tolerance(1), &[]).unwrap();
        assert_eq!(report.final_door_state, VoteValue::Open);
        assert_eq!(report.security_level, SecurityLevel::Maintenance);
        assert!(report.rounds().all(|r| r.success));
        let (_, last) = report.actions().last().unwrap();
        assert_eq!(last.door_override, Some(DoorOverride::Restoration));
    }

    #[test]
    fn test_byzantine_attack_trips_detection_then_fails() {
        let report = byzantine_attack(NetworkConfig::with_fault_tolerance(2), &[]).unwrap();
        let rounds: Vec<_> = report.rounds().collect();
        assert_eq!(rounds.len(), 4);
        assert!(rounds[..3].iter().all(|r| r.success));
        assert_eq!(rounds[1].agreed_value, Some(VoteValue::Locked));
        assert!(matches!(
            rounds[3].reason,
            Some(RoundFailure::InsufficientHealthyNodes { healthy: 4, required: 5 })
        ));

        let corruptions: Vec<_> = report
            .actions()
            .filter(|(label, _)| label.starts_with("corrupt"))
            .collect();
        assert!(!corruptions[0].1.attack_detected);
        assert!(!corruptions[1].1.attack_detected);
        assert!(corruptions[2]
            .1
            .attack_signals
            .contains(&AttackSignal::ByzantineBeyondTolerance { byzantine: 3, f: 2 }));
    }

    #[test]
    fn test_sabotage_exploits_failsafe() {
        let report = sabotage(NetworkConfig::with_fault_tolerance(1), &[]).unwrap();
        assert!(report.failsafe_active);
        assert_eq!(report.rounds().count(), 10);
        assert!(report.rounds().all(|r| !r.success));
        let (_, crash) = report.actions().next().unwrap();
        assert!(crash.attack_signals.contains(&AttackSignal::CommanderTargeted));
        let (_, exploit) = report.actions().last().unwrap();
        assert_eq!(exploit.door_override, Some(DoorOverride::Sabotage));
        assert_eq!(report.final_door_state, VoteValue::Open);
    }

    #[test]
    fn test_sabotage_honours_configured_threshold() {
        let config = NetworkConfig {
            failsafe_threshold: 3,
            ..NetworkConfig::with_fault_tolerance(1)
        };
        let report = sabotage(config, &[]).unwrap();
        assert_eq!(report.rounds().count(), 3);
        assert!(report.failsafe_active);
        assert_eq!(report.final_door_state, VoteValue::Open);
    }

    #[test]
    fn test_byzantine_attack_scales_with_fault_tolerance() {
        let report = byzantine_attack(NetworkConfig::with_fault_tolerance(1), &[]).unwrap();
        let rounds: Vec<_> = report.rounds().collect();
        assert_eq!(rounds.len(), 3);
        assert!(rounds[..2].iter().all(|r| r.success));
        assert_eq!(
            rounds[2].reason,
            Some(RoundFailure::InsufficientHealthyNodes { healthy: 2, required: 3 })
        );
        let (_, last) = report.actions().last().unwrap();
        assert!(last
            .attack_signals
            .contains(&AttackSignal::ByzantineBeyondTolerance { byzantine: 2, f: 1 }));
    }

    #[test]
    fn test_scenario_keeps_base_config_and_feeds_sinks() {
        let sink = MemorySink::new();
        let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(sink.clone())];
        let config = NetworkConfig {
            initial_door_state: VoteValue::Open,
            ..NetworkConfig::with_fault_tolerance(2)
        };

        let report = restoration(config, &sinks).unwrap();
        assert_eq!(report.rounds().count(), 1);
        assert_eq!(
            sink.count(|e| matches!(e, ConsensusEvent::RoundStarted { .. })),
            1
        );
        // Six reboots take the 7-node puzzle layout back to full health.
        let reboots = report
            .actions()
            .filter(|(label, _)| label.starts_with("reboot"))
            .count();
        assert_eq!(reboots, 6);
        // Door already OPEN, so the command does not emit a door change.
        assert_eq!(
            sink.count(|e| matches!(e, ConsensusEvent::DoorStateChanged { .. })),
            0
        );
    }
}
