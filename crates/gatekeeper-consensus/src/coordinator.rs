// NETWORK COORDINATOR
// Owns the roster, routes every emitted message, and decides each round.
//
// SAFETY INVARIANTS:
// 1. Consensus is never reported without 2f+1 non-crashed nodes holding the same decision
// 2. The live decision tally and the end-of-round tally always agree
// 3. No PREPARE is released before every PRE-PREPARE of the round is delivered
// 4. failsafe_active never returns to false within a session
// 5. Health and door changes happen only between rounds

use crate::agent::{AgentOutput, NodeAgent};
use crate::config::NetworkConfig;
use crate::error::{ConfigError, RoundFailure};
use crate::events::{ConsensusEvent, DoorChangeCause, EventBus, EventSink};
use crate::message::{Delivered, Message, MessageKind, Recipient};
use crate::scheduler::{DeliveryQueue, Stage, MAX_SETTLE_PASSES};
use crate::transport::{Delivery, ReliableTransport, Transport};
use crate::types::{
    FaultTolerance, NetworkHealth, NodeHealth, NodeId, NodeSnapshot, Phase, SecurityLevel,
    VoteValue, COMMANDER_ID,
};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Final decisions across the non-crashed nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub open: usize,
    pub locked: usize,
    pub undecided: usize,
}

impl VoteTally {
    pub fn record(&mut self, decision: Option<VoteValue>) {
        match decision {
            Some(VoteValue::Open) => self.open += 1,
            Some(VoteValue::Locked) => self.locked += 1,
            None => self.undecided += 1,
        }
    }

    pub fn count(&self, value: VoteValue) -> usize {
        match value {
            VoteValue::Open => self.open,
            VoteValue::Locked => self.locked,
        }
    }

    pub fn decided(&self) -> usize {
        self.open + self.locked
    }

    /// Open is checked before Locked.
    pub fn quorum_value(&self, fault: FaultTolerance) -> Option<VoteValue> {
        VoteValue::ALL
            .into_iter()
            .find(|&value| fault.is_quorum(self.count(value)))
    }
}

/// Messages handed to the network in one round, per kind. A broadcast counts once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounts {
    pub pre_prepare: usize,
    pub prepare: usize,
    pub commit: usize,
    /// Per-recipient copies the transport refused.
    pub dropped: usize,
}

impl MessageCounts {
    fn record(&mut self, kind: MessageKind) {
        match kind {
            MessageKind::PrePrepare => self.pre_prepare += 1,
            MessageKind::Prepare => self.prepare += 1,
            MessageKind::Commit => self.commit += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pre_prepare + self.prepare + self.commit
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: u64,
    pub success: bool,
    pub agreed_value: Option<VoteValue>,
    pub reason: Option<RoundFailure>,
    pub decided_nodes: usize,
    pub votes: VoteTally,
    pub phase_reached: Phase,
    pub messages: MessageCounts,
    pub passes: u32,
    /// SHA-256 over the delivery transcript, excluding round numbers.
    pub fingerprint: String,
}

/// Drives rounds over a fixed roster of 3f + 1 agents.
pub struct NetworkCoordinator {
    config: NetworkConfig,
    fault: FaultTolerance,
    agents: Vec<NodeAgent>,
    transport: Box<dyn Transport>,
    rng: ChaCha8Rng,
    events: EventBus,

    round: u64,
    door_state: VoteValue,
    failed_rounds: u32,
    failsafe_active: bool,
    security_level: SecurityLevel,

    queue: DeliveryQueue,
    counts: MessageCounts,
    transcript: Vec<Delivered>,
    /// Nodes that announced a decision this round, by value.
    live_decisions: BTreeMap<VoteValue, BTreeSet<NodeId>>,
    live_consensus: Option<VoteValue>,
    last_result: Option<RoundResult>,
}

impl NetworkCoordinator {
    pub fn new(config: NetworkConfig) -> Result<Self, ConfigError> {
        Self::with_transport(config, Box::new(ReliableTransport))
    }

    pub fn with_transport(
        config: NetworkConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let fault = config.validate()?;
        let agents = (0..fault.total_nodes())
            .map(|id| {
                let health = if config.crashed_at_start.contains(&id) {
                    NodeHealth::Crashed
                } else {
                    NodeHealth::Healthy
                };
                NodeAgent::new(id, health, fault)
            })
            .collect();

        info!(
            "network ready: f={}, {} nodes, quorum {}, transport {}",
            fault.f(),
            fault.total_nodes(),
            fault.quorum(),
            transport.name()
        );

        Ok(NetworkCoordinator {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            door_state: config.initial_door_state,
            config,
            fault,
            agents,
            transport,
            events: EventBus::new(),
            round: 0,
            failed_rounds: 0,
            failsafe_active: false,
            security_level: SecurityLevel::Normal,
            queue: DeliveryQueue::new(),
            counts: MessageCounts::default(),
            transcript: Vec::new(),
            live_decisions: BTreeMap::new(),
            live_consensus: None,
            last_result: None,
        })
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    /// Swap the delivery seam between rounds.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        info!("transport {} -> {}", self.transport.name(), transport.name());
        self.transport = transport;
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn fault(&self) -> FaultTolerance {
        self.fault
    }

    /// Number of rounds started so far.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn node(&self, id: NodeId) -> Option<NodeSnapshot> {
        self.agents.get(id).map(NodeAgent::snapshot)
    }

    pub fn nodes(&self) -> Vec<NodeSnapshot> {
        self.agents.iter().map(NodeAgent::snapshot).collect()
    }

    pub fn agent(&self, id: NodeId) -> Option<&NodeAgent> {
        self.agents.get(id)
    }

    pub fn network_health(&self) -> NetworkHealth {
        NetworkHealth::from_healths(self.fault, self.agents.iter().map(NodeAgent::health))
    }

    pub fn door_state(&self) -> VoteValue {
        self.door_state
    }

    pub fn failed_rounds(&self) -> u32 {
        self.failed_rounds
    }

    pub fn failsafe_active(&self) -> bool {
        self.failsafe_active
    }

    pub fn failsafe_threshold(&self) -> u32 {
        self.config.failsafe_threshold
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn last_result(&self) -> Option<&RoundResult> {
        self.last_result.as_ref()
    }

    /// Every (message, receiver) pair the transport admitted in the last round.
    pub fn last_transcript(&self) -> &[Delivered] {
        &self.transcript
    }

    /// PRE-PREPARE value each lieutenant received in the last round.
    pub fn last_pre_prepare_values(&self) -> BTreeMap<NodeId, VoteValue> {
        self.transcript
            .iter()
            .filter(|d| d.message.kind() == MessageKind::PrePrepare)
            .map(|d| (d.to, d.message.value()))
            .collect()
    }

    /// Run one full three-phase round for `proposed`.
    pub fn run_consensus_round(&mut self, proposed: VoteValue) -> RoundResult {
        self.round += 1;
        for agent in &mut self.agents {
            agent.reset_for_new_round();
            debug_assert_eq!(agent.current_round(), self.round);
        }
        self.queue.clear();
        self.counts = MessageCounts::default();
        self.transcript.clear();
        self.live_decisions.clear();
        self.live_consensus = None;

        info!("=== CONSENSUS ROUND {} === proposing {}", self.round, proposed);
        self.events.publish(ConsensusEvent::RoundStarted { round: self.round });

        if let Some(reason) = self.pre_check() {
            warn!("round {} rejected at pre-check: {}", self.round, reason);
            let votes = self.final_tally();
            return self.finish(Phase::PreCheck, votes, Err(reason));
        }

        // Stage A: the commander's proposal reaches every lieutenant.
        let peers: Vec<NodeId> = self
            .agents
            .iter()
            .filter(|a| a.id() != COMMANDER_ID && !a.health().is_crashed())
            .map(NodeAgent::id)
            .collect();
        let outputs = self.agents[COMMANDER_ID].broadcast_proposal_as_commander(
            proposed,
            &peers,
            self.config.commander_equivocation,
            &mut self.rng,
        );
        self.apply_outputs(COMMANDER_ID, outputs);
        self.drain_stage(Stage::PrePrepare);
        debug_assert_eq!(self.queue.stage_len(Stage::PrePrepare), 0);

        // Barrier: every node releases the PREPARE it scheduled in stage A.
        for id in 0..self.agents.len() {
            let outputs = self.agents[id].release_prepare();
            self.apply_outputs(id, outputs);
        }

        // Stage B: settle PREPAREs, then COMMITs.
        while let Some(stage) = self.queue.next_stage() {
            self.drain_stage(stage);
        }
        debug_assert!(
            self.queue.passes() <= MAX_SETTLE_PASSES,
            "round settled in {} passes",
            self.queue.passes()
        );

        let votes = self.final_tally();
        let agreed = votes.quorum_value(self.fault);
        debug_assert_eq!(
            agreed, self.live_consensus,
            "end-of-round tally disagrees with announced decisions"
        );

        match agreed {
            Some(value) => self.finish(Phase::Complete, votes, Ok(value)),
            None => {
                let phase = if self.counts.commit > 0 {
                    Phase::Commit
                } else if self.counts.prepare > 0 {
                    Phase::Prepare
                } else {
                    Phase::PrePrepare
                };
                let reason = RoundFailure::NoConsensus {
                    open: votes.open,
                    locked: votes.locked,
                    undecided: votes.undecided,
                };
                self.finish(phase, votes, Err(reason))
            }
        }
    }

    fn pre_check(&self) -> Option<RoundFailure> {
        let health = self.network_health();
        if !health.can_attempt_round() {
            return Some(RoundFailure::InsufficientHealthyNodes {
                healthy: health.healthy,
                required: health.required_for_consensus,
            });
        }
        let commander = self.agents[COMMANDER_ID].health();
        let commander_blocked = if self.config.require_healthy_commander {
            !commander.is_healthy()
        } else {
            commander.is_crashed()
        };
        if commander_blocked {
            return Some(RoundFailure::CommanderNotHealthy { health: commander });
        }
        None
    }

    fn drain_stage(&mut self, stage: Stage) {
        let pass = self.queue.begin_pass();
        debug!(
            "pass {}: draining {} {:?} messages",
            pass,
            self.queue.stage_len(stage),
            stage
        );
        while let Some(message) = self.queue.pop(stage) {
            self.deliver(message);
        }
    }

    /// Route one message to its recipients through the transport.
    fn deliver(&mut self, message: Message) {
        let recipients: Vec<NodeId> = match message.recipient() {
            Recipient::Node(to) if to < self.agents.len() => vec![to],
            Recipient::Node(to) => {
                warn!("dropping {}: node {} does not exist", message, to);
                Vec::new()
            }
            Recipient::Broadcast => (0..self.agents.len())
                .filter(|&id| id != message.sender())
                .collect(),
        };

        for to in recipients {
            if self.transport.admit(&message, to) == Delivery::Drop {
                self.counts.dropped += 1;
                debug!("transport dropped {} for Node {}", message, to);
                continue;
            }
            self.transcript.push(Delivered { message, to });
            let agent = &mut self.agents[to];
            let outputs = match message.kind() {
                MessageKind::PrePrepare => agent.receive_pre_prepare(&message),
                MessageKind::Prepare => agent.receive_prepare(&message),
                MessageKind::Commit => agent.receive_commit(&message),
            };
            self.apply_outputs(to, outputs);
        }
    }

    fn apply_outputs(&mut self, from: NodeId, outputs: Vec<AgentOutput>) {
        debug_assert!(
            outputs.is_empty() || !self.agents[from].health().is_crashed(),
            "crashed Node {} produced output",
            from
        );
        for output in outputs {
            match output {
                AgentOutput::Send(message) => {
                    self.counts.record(message.kind());
                    self.events.publish(ConsensusEvent::MessageSent { message });
                    self.queue.push(message);
                }
                AgentOutput::Committed(value) => {
                    self.events
                        .publish(ConsensusEvent::DecisionMade { node: from, value });
                }
                AgentOutput::Decided(value) => {
                    self.events
                        .publish(ConsensusEvent::ConsensusReached { node: from, value });
                    self.track_decision(from, value);
                }
            }
        }
    }

    fn track_decision(&mut self, node: NodeId, value: VoteValue) {
        debug_assert!(
            self.live_decisions.values().all(|nodes| !nodes.contains(&node)),
            "Node {} decided twice in round {}",
            node,
            self.round
        );
        let nodes = self.live_decisions.entry(value).or_default();
        nodes.insert(node);
        if self.live_consensus.is_none() && self.fault.is_quorum(nodes.len()) {
            debug!("round {}: {} nodes decided {}", self.round, nodes.len(), value);
            self.live_consensus = Some(value);
        }
    }

    fn final_tally(&self) -> VoteTally {
        let mut votes = VoteTally::default();
        for agent in self.agents.iter().filter(|a| !a.health().is_crashed()) {
            votes.record(agent.final_decision());
        }
        votes
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for delivered in &self.transcript {
            let message = &delivered.message;
            hasher.update(message.kind().as_str().as_bytes());
            hasher.update((message.sender() as u64).to_le_bytes());
            hasher.update((delivered.to as u64).to_le_bytes());
            hasher.update(message.value().as_str().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn finish(
        &mut self,
        phase_reached: Phase,
        votes: VoteTally,
        outcome: Result<VoteValue, RoundFailure>,
    ) -> RoundResult {
        let round = self.round;
        let (agreed_value, reason) = match outcome {
            Ok(value) => {
                info!(
                    "round {}: CONSENSUS on {} ({} nodes)",
                    round,
                    value,
                    votes.count(value)
                );
                self.failed_rounds = 0;
                self.set_door_state(value, DoorChangeCause::Consensus);
                self.events
                    .publish(ConsensusEvent::ConsensusAchieved { round, value });
                (Some(value), None)
            }
            Err(reason) => {
                self.failed_rounds = self.failed_rounds.saturating_add(1);
                warn!(
                    "round {} failed: {} ({}/{} toward failsafe)",
                    round, reason, self.failed_rounds, self.config.failsafe_threshold
                );
                self.events.publish(ConsensusEvent::ConsensusFailed {
                    round,
                    reason: reason.clone(),
                });
                self.check_failsafe();
                (None, Some(reason))
            }
        };

        self.refresh_security_level();

        let result = RoundResult {
            round,
            success: agreed_value.is_some(),
            agreed_value,
            reason,
            decided_nodes: votes.decided(),
            votes,
            phase_reached,
            messages: self.counts,
            passes: self.queue.passes(),
            fingerprint: self.fingerprint(),
        };
        self.events.publish(ConsensusEvent::RoundCompleted {
            result: result.clone(),
        });
        self.last_result = Some(result.clone());
        result
    }

    fn check_failsafe(&mut self) {
        if self.failsafe_active || self.failed_rounds < self.config.failsafe_threshold {
            return;
        }
        self.failsafe_active = true;
        warn!(
            "FAILSAFE ACTIVATED after {} consecutive failed rounds",
            self.failed_rounds
        );
        self.events.publish(ConsensusEvent::FailsafeActivated {
            failed_rounds: self.failed_rounds,
        });
    }

    /// Recompute the security level from aggregate node health.
    ///
    /// Maintenance requires every node healthy; anything less is Normal.
    /// Defensive is never entered or left automatically.
    pub fn refresh_security_level(&mut self) -> SecurityLevel {
        if self.security_level == SecurityLevel::Defensive {
            return self.security_level;
        }
        let health = self.network_health();
        let next = if health.healthy == health.total {
            SecurityLevel::Maintenance
        } else {
            SecurityLevel::Normal
        };
        if next != self.security_level {
            info!("security level {} -> {}", self.security_level, next);
            self.events.publish(ConsensusEvent::SecurityLevelChanged {
                from: self.security_level,
                to: next,
            });
            self.security_level = next;
        }
        next
    }

    /// Replace a node's health between rounds and return the previous value.
    pub(crate) fn set_node_health(&mut self, id: NodeId, health: NodeHealth) -> NodeHealth {
        let old = self.agents[id].set_health(health);
        if old != health {
            info!("Node {}: {} -> {}", id, old, health);
            self.events.publish(ConsensusEvent::StateChanged {
                node: id,
                old,
                new: health,
            });
        }
        old
    }

    pub(crate) fn set_door_state(&mut self, value: VoteValue, cause: DoorChangeCause) {
        if value == self.door_state {
            return;
        }
        let from = std::mem::replace(&mut self.door_state, value);
        info!("door {} -> {} ({:?})", from, value, cause);
        self.events.publish(ConsensusEvent::DoorStateChanged {
            from,
            to: value,
            cause,
        });
    }

    pub(crate) fn publish(&self, event: ConsensusEvent) {
        self.events.publish(event);
    }
}

impl std::fmt::Debug for NetworkCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCoordinator")
            .field("fault", &self.fault)
            .field("round", &self.round)
            .field("door_state", &self.door_state)
            .field("failed_rounds", &self.failed_rounds)
            .field("failsafe_active", &self.failsafe_active)
            .field("security_level", &self.security_level)
            .field("transport", &self.transport.name())
            .finish()
    }
}
