// DIFFERENTIAL TESTS
// The agent-driven coordinator against the centralized reference referee,
// plus quorum arithmetic, over generated rosters and seeds.

use gatekeeper_consensus::{
    AdminActions, CommanderEquivocation, FaultTolerance, NetworkConfig, NetworkCoordinator,
    NodeHealth, ReferenceReferee, VoteValue,
};
use proptest::prelude::*;

fn health_from(code: u8) -> NodeHealth {
    match code {
        0 => NodeHealth::Healthy,
        1 => NodeHealth::Crashed,
        _ => NodeHealth::Byzantine,
    }
}

fn vote_from(open: bool) -> VoteValue {
    if open {
        VoteValue::Open
    } else {
        VoteValue::Locked
    }
}

fn roster() -> impl Strategy<Value = (usize, Vec<u8>)> {
    (1usize..=3).prop_flat_map(|f| (Just(f), prop::collection::vec(0u8..3, 3 * f + 1)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_coordinator_matches_reference_referee(
        (f, codes) in roster(),
        seed in any::<u64>(),
        open in any::<bool>(),
        strict_commander in any::<bool>(),
        negate in any::<bool>(),
    ) {
        let healths: Vec<NodeHealth> = codes.iter().map(|&c| health_from(c)).collect();
        let config = NetworkConfig {
            fault_tolerance: f,
            seed,
            require_healthy_commander: strict_commander,
            commander_equivocation: if negate {
                CommanderEquivocation::Negate
            } else {
                CommanderEquivocation::Random
            },
            crashed_at_start: (0..healths.len()).filter(|&id| healths[id].is_crashed()).collect(),
            ..Default::default()
        };
        let mut net = NetworkCoordinator::new(config).unwrap();
        let mut admin = AdminActions::new();
        for (id, health) in healths.iter().enumerate() {
            if health.is_byzantine() {
                prop_assert!(admin.corrupt(&mut net, id).success);
            }
        }

        let proposal = vote_from(open);
        let result = net.run_consensus_round(proposal);
        let observed: Vec<NodeHealth> = net.nodes().iter().map(|n| n.health).collect();
        prop_assert_eq!(&observed, &healths);

        let referee =
            ReferenceReferee::new(net.fault()).require_healthy_commander(strict_commander);
        let expected = referee.evaluate(&healths, proposal, &net.last_pre_prepare_values());

        prop_assert_eq!(result.agreed_value, expected.agreed_value);
        prop_assert_eq!(result.votes, expected.votes);
        prop_assert_eq!(result.decided_nodes, expected.decided_nodes);
        prop_assert_eq!(result.reason, expected.reason);

        for (id, value) in &expected.prepares {
            prop_assert_eq!(net.agent(*id).and_then(|a| a.prepare_value()), Some(*value));
        }
        for (id, value) in &expected.commits {
            prop_assert_eq!(net.agent(*id).and_then(|a| a.commit_value()), Some(*value));
        }
    }

    #[test]
    fn prop_bounded_faults_decide_the_proposal(
        (f, faulty, crash_flags) in (1usize..=3).prop_flat_map(|f| {
            let lieutenants: Vec<usize> = (1..=3 * f).collect();
            (
                Just(f),
                prop::sample::subsequence(lieutenants, 0..=f),
                prop::collection::vec(any::<bool>(), f),
            )
        }),
        open in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let config = NetworkConfig::with_fault_tolerance(f).seed(seed);
        let mut net = NetworkCoordinator::new(config).unwrap();
        let mut admin = AdminActions::new();
        for (id, crash) in faulty.iter().zip(&crash_flags) {
            let outcome = if *crash {
                admin.crash(&mut net, *id)
            } else {
                admin.corrupt(&mut net, *id)
            };
            prop_assert!(outcome.success);
        }

        let proposal = vote_from(open);
        let result = net.run_consensus_round(proposal);
        prop_assert!(result.success);
        prop_assert_eq!(result.agreed_value, Some(proposal));
        prop_assert!(result.decided_nodes >= 2 * f + 1);
        prop_assert_eq!(net.door_state(), proposal);
    }

    #[test]
    fn prop_quorums_intersect_in_an_honest_node(f in 1usize..500) {
        let fault = FaultTolerance::new(f).unwrap();
        prop_assert_eq!(fault.total_nodes(), 3 * f + 1);
        prop_assert_eq!(fault.quorum(), 2 * f + 1);
        // Two quorums overlap in at least f + 1 nodes, so at least one is honest.
        prop_assert!(2 * fault.quorum() - fault.total_nodes() >= f + 1);
        // Only one value can hold a quorum.
        prop_assert!(2 * fault.quorum() > fault.total_nodes());
    }
}
