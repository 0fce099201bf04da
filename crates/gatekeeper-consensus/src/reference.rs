// REFERENCE REFEREE
// Centralized direct-tally model of one round, used for differential testing.
//
// SAFETY INVARIANTS:
// 1. Pure function of (roster health, proposal, PRE-PREPARE values)
// 2. Applies the same pre-check and corruption rules as the agents
// 3. Under reliable delivery, agrees with the agent-driven coordinator
//
// With every broadcast delivered, all participants observe the same
// PREPARE and COMMIT multisets, so one tally stands in for every node.

use crate::agent::tally;
use crate::coordinator::VoteTally;
use crate::error::RoundFailure;
use crate::message::Message;
use crate::types::{FaultTolerance, NetworkHealth, NodeHealth, NodeId, VoteValue, COMMANDER_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceOutcome {
    pub agreed_value: Option<VoteValue>,
    pub reason: Option<RoundFailure>,
    pub decided_nodes: usize,
    pub votes: VoteTally,
    /// PREPARE value sent by each participant.
    pub prepares: BTreeMap<NodeId, VoteValue>,
    /// COMMIT value sent by each participant.
    pub commits: BTreeMap<NodeId, VoteValue>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReferenceReferee {
    fault: FaultTolerance,
    require_healthy_commander: bool,
}

impl ReferenceReferee {
    pub fn new(fault: FaultTolerance) -> Self {
        ReferenceReferee {
            fault,
            require_healthy_commander: true,
        }
    }

    pub fn require_healthy_commander(mut self, required: bool) -> Self {
        self.require_healthy_commander = required;
        self
    }

    fn emitted(health: NodeHealth, value: VoteValue) -> VoteValue {
        if health.is_byzantine() {
            value.negate()
        } else {
            value
        }
    }

    fn pre_check(&self, healths: &[NodeHealth]) -> Option<RoundFailure> {
        let health = NetworkHealth::from_healths(self.fault, healths.iter().copied());
        if !health.can_attempt_round() {
            return Some(RoundFailure::InsufficientHealthyNodes {
                healthy: health.healthy,
                required: health.required_for_consensus,
            });
        }
        // A roster without a commander slot counts as a crashed commander.
        let commander = healths
            .get(COMMANDER_ID)
            .copied()
            .unwrap_or(NodeHealth::Crashed);
        let blocked = if self.require_healthy_commander {
            !commander.is_healthy()
        } else {
            commander.is_crashed()
        };
        blocked.then_some(RoundFailure::CommanderNotHealthy { health: commander })
    }

    /// Tally one round directly.
    ///
    /// `pre_prepare_values` holds the value each lieutenant received from the
    /// commander; a lieutenant missing from it sends no PREPARE.
    pub fn evaluate(
        &self,
        healths: &[NodeHealth],
        proposal: VoteValue,
        pre_prepare_values: &BTreeMap<NodeId, VoteValue>,
    ) -> ReferenceOutcome {
        debug_assert_eq!(healths.len(), self.fault.total_nodes());
        let participants: Vec<NodeId> = (0..healths.len())
            .filter(|&id| !healths[id].is_crashed())
            .collect();

        let mut outcome = ReferenceOutcome {
            agreed_value: None,
            reason: None,
            decided_nodes: 0,
            votes: VoteTally::default(),
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
        };

        if let Some(reason) = self.pre_check(healths) {
            outcome.votes.undecided = participants.len();
            outcome.reason = Some(reason);
            return outcome;
        }

        for &id in &participants {
            let received = if id == COMMANDER_ID {
                Some(proposal)
            } else {
                pre_prepare_values.get(&id).copied()
            };
            if let Some(value) = received {
                outcome
                    .prepares
                    .insert(id, Self::emitted(healths[id], value));
            }
        }

        let prepare_msgs: Vec<Message> = outcome
            .prepares
            .iter()
            .map(|(&id, &value)| Message::prepare(id, value, 0))
            .collect();
        let prepared = self.quorum(&prepare_msgs);

        if let Some(value) = prepared {
            for &id in &participants {
                outcome.commits.insert(id, Self::emitted(healths[id], value));
            }
        }

        let commit_msgs: Vec<Message> = outcome
            .commits
            .iter()
            .map(|(&id, &value)| Message::commit(id, value, 0))
            .collect();
        let decision = self.quorum(&commit_msgs);

        for _ in &participants {
            outcome.votes.record(decision);
        }
        outcome.decided_nodes = outcome.votes.decided();
        outcome.agreed_value = outcome.votes.quorum_value(self.fault);
        if outcome.agreed_value.is_none() {
            outcome.reason = Some(RoundFailure::NoConsensus {
                open: outcome.votes.open,
                locked: outcome.votes.locked,
                undecided: outcome.votes.undecided,
            });
        }
        outcome
    }

    fn quorum(&self, msgs: &[Message]) -> Option<VoteValue> {
        let senders = tally(msgs);
        VoteValue::ALL.into_iter().find(|value| {
            senders
                .get(value)
                .map_or(false, |s| self.fault.is_quorum(s.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referee(f: usize) -> ReferenceReferee {
        ReferenceReferee::new(FaultTolerance::new(f).unwrap())
    }

    fn honest_pre_prepares(n: usize, value: VoteValue) -> BTreeMap<NodeId, VoteValue> {
        (1..n).map(|id| (id, value)).collect()
    }

    #[test]
    fn test_one_byzantine_lieutenant() {
        let healths = [
            NodeHealth::Healthy,
            NodeHealth::Healthy,
            NodeHealth::Byzantine,
            NodeHealth::Healthy,
        ];
        let received = honest_pre_prepares(4, VoteValue::Open);
        let outcome = referee(1).evaluate(&healths, VoteValue::Open, &received);
        assert_eq!(outcome.agreed_value, Some(VoteValue::Open));
        assert_eq!(outcome.prepares[&2], VoteValue::Locked);
        assert_eq!(outcome.commits[&2], VoteValue::Locked);
        assert_eq!(outcome.decided_nodes, 4);
    }

    #[test]
    fn test_split_prepares_produce_no_commit() {
        let healths = [
            NodeHealth::Byzantine,
            NodeHealth::Healthy,
            NodeHealth::Healthy,
            NodeHealth::Healthy,
        ];
        let mut received = BTreeMap::new();
        received.insert(1, VoteValue::Open);
        received.insert(2, VoteValue::Locked);
        received.insert(3, VoteValue::Open);

        let outcome = referee(1)
            .require_healthy_commander(false)
            .evaluate(&healths, VoteValue::Open, &received);
        // Commander prepares LOCKED, lieutenants OPEN/LOCKED/OPEN: 2 vs 2.
        assert!(outcome.commits.is_empty());
        assert_eq!(outcome.votes.undecided, 4);
        assert!(matches!(outcome.reason, Some(RoundFailure::NoConsensus { .. })));
    }

    #[test]
    fn test_pre_check_matches_coordinator_rules() {
        let healths = [
            NodeHealth::Byzantine,
            NodeHealth::Healthy,
            NodeHealth::Healthy,
            NodeHealth::Healthy,
        ];
        let outcome = referee(1).evaluate(&healths, VoteValue::Open, &BTreeMap::new());
        assert_eq!(
            outcome.reason,
            Some(RoundFailure::CommanderNotHealthy {
                health: NodeHealth::Byzantine
            })
        );
        assert_eq!(outcome.votes.undecided, 4);
    }

    #[test]
    fn test_empty_roster_fails_pre_check() {
        assert_eq!(
            referee(1).pre_check(&[]),
            Some(RoundFailure::InsufficientHealthyNodes {
                healthy: 0,
                required: 3
            })
        );
    }
}
