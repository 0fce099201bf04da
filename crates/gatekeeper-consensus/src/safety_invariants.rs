// DOOR-LOCK CONSENSUS - SAFETY INVARIANTS
//
// This module documents the safety guarantees of the three-phase door-lock protocol.
// All claims are enforced by code and verified by tests.

//! # Safety Invariants for Door-Lock Consensus
//!
//! ## 1. QUORUM ARITHMETIC
//!
//! **Invariant**: For every f >= 1 the roster has N = 3f + 1 nodes and every
//! phase advances on 2f + 1 unique agreeing senders.
//!
//! **Implementation**:
//! - `FaultTolerance::new()` rejects f = 0
//! - `agent::tally()` counts each (sender, value) pair once
//! - `VoteTally::quorum_value()` never reports a value below 2f + 1
//!
//! **Verification**:
//! - Test: `test_quorum_arithmetic_small_networks`
//! - Test: `prop_quorums_intersect_in_an_honest_node`
//! - Test: `test_duplicate_prepares_from_one_sender_count_once`
//!
//! ---
//!
//! ## 2. SAFETY UNDER BOUNDED FAULTS
//!
//! **Invariant**: With a healthy commander and at most f faulty lieutenants, a
//! round always decides the proposed value.
//!
//! **Implementation**:
//! - Byzantine nodes run the honest logic and negate only what they emit
//! - Each node counts its own PREPARE and COMMIT toward its tally
//!
//! **Verification**:
//! - Test: `test_single_byzantine_lieutenant_is_tolerated`
//! - Test: `prop_bounded_faults_decide_the_proposal`
//!
//! **Threat Model**:
//! - f Byzantine lieutenants: 2f + 1 honest PREPAREs still form the only quorum
//! - f crashed lieutenants: the remaining 2f + 1 nodes are exactly a quorum
//!
//! ---
//!
//! ## 3. TWO-STAGE DELIVERY BARRIER
//!
//! **Invariant**: No PREPARE leaves any node before every PRE-PREPARE of the
//! round has been delivered.
//!
//! **Implementation**:
//! - `NodeAgent::receive_pre_prepare()` only schedules the PREPARE
//! - `NetworkCoordinator` drains the PRE-PREPARE stage, then calls
//!   `NodeAgent::release_prepare()` on every node in id order
//! - `DeliveryQueue` keeps one FIFO per stage; settling is bounded by
//!   `MAX_SETTLE_PASSES` (debug assertion)
//!
//! **Verification**:
//! - Test: `test_pre_prepare_defers_prepare_until_release`
//! - Test: `test_transcript_orders_stages`
//!
//! ---
//!
//! ## 4. LIVE AND FINAL TALLIES AGREE
//!
//! **Invariant**: The value reached by 2f + 1 `Decided` announcements equals the
//! value of the end-of-round tally over non-crashed nodes.
//!
//! **Implementation**:
//! - `NetworkCoordinator::track_decision()` accumulates announcements
//! - `run_consensus_round()` asserts agreement in debug builds
//! - A node announcing twice or a crashed node emitting fails a debug assertion
//!
//! **Verification**:
//! - Test: `prop_coordinator_matches_reference_referee`
//!
//! ---
//!
//! ## 5. FAILSAFE MONOTONICITY
//!
//! **Invariant**: After `failsafe_threshold` consecutive failed rounds the
//! failsafe is active and stays active for the rest of the session.
//!
//! **Implementation**:
//! - `NetworkCoordinator::check_failsafe()` only ever sets the flag
//! - Success resets the failure counter, never the flag
//!
//! **Verification**:
//! - Test: `test_failsafe_is_monotonic`
//! - Test: `test_failsafe_survives_recovery`
//!
//! ---
//!
//! ## 6. ROUND ISOLATION AND DETERMINISM
//!
//! **Invariant**: No inbox, flag or decision survives `reset_for_new_round()`.
//! Identical inputs under the same seed yield identical transcripts.
//!
//! **Implementation**:
//! - Every agent is reset before pre-check
//! - The transcript fingerprint excludes round numbers
//! - The commander's equivocation draws from a ChaCha8 RNG seeded by config
//!
//! **Verification**:
//! - Test: `test_reset_isolates_rounds`
//! - Test: `test_byzantine_lies_repeat_across_rounds`
//! - Test: `test_same_seed_same_transcript`
//!
//! ---
//!
//! ## 7. REJECTIONS DO NOT MUTATE
//!
//! **Invariant**: An administrative action that fails its precondition leaves
//! health, door and action log unchanged.
//!
//! **Verification**:
//! - Test: `test_invalid_node_is_rejected_without_mutation`
//! - Test: `test_rejected_actions_leave_state_untouched`
