// NODE AGENT
// Autonomous per-node state machine for the three-phase commit
//
// SAFETY INVARIANTS:
// 1. A Crashed node never inspects its inbox, emits, or changes its decision
// 2. A node sends at most one PREPARE and one COMMIT per round
// 3. Tallies count each (sender, value) pair once per phase
// 4. A node finalizes at most once per round and never retracts
// 5. A Byzantine node runs the honest logic; only emitted values are negated
// 6. Messages from another round are ignored

use crate::config::CommanderEquivocation;
use crate::message::{Message, MessageKind};
use crate::types::{FaultTolerance, NodeHealth, NodeId, NodeSnapshot, VoteValue, COMMANDER_ID};
use log::{debug, warn};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Effects requested by an agent handler. The coordinator turns these into
/// routing and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutput {
    /// Hand a message to the network.
    Send(Message),

    /// The node committed to this value (its COMMIT is in the same batch).
    Committed(VoteValue),

    /// The node finalized its decision for the round.
    Decided(VoteValue),
}

/// One participant's local view of the protocol.
#[derive(Debug, Clone)]
pub struct NodeAgent {
    id: NodeId,
    health: NodeHealth,
    fault: FaultTolerance,
    current_round: u64,

    pre_prepare_inbox: Vec<Message>,
    prepare_inbox: Vec<Message>,
    commit_inbox: Vec<Message>,

    has_sent_prepare: bool,
    /// PREPARE recorded but held until the pre-prepare barrier.
    prepare_pending: bool,
    prepare_value: Option<VoteValue>,

    has_sent_commit: bool,
    commit_value: Option<VoteValue>,

    final_decision: Option<VoteValue>,
}

impl NodeAgent {
    pub fn new(id: NodeId, health: NodeHealth, fault: FaultTolerance) -> Self {
        NodeAgent {
            id,
            health,
            fault,
            current_round: 0,
            pre_prepare_inbox: Vec::new(),
            prepare_inbox: Vec::new(),
            commit_inbox: Vec::new(),
            has_sent_prepare: false,
            prepare_pending: false,
            prepare_value: None,
            has_sent_commit: false,
            commit_value: None,
            final_decision: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_commander(&self) -> bool {
        self.id == COMMANDER_ID
    }

    pub fn health(&self) -> NodeHealth {
        self.health
    }

    /// Replace the node's health and return the previous value.
    pub fn set_health(&mut self, health: NodeHealth) -> NodeHealth {
        std::mem::replace(&mut self.health, health)
    }

    pub fn current_round(&self) -> u64 {
        self.current_round
    }

    pub fn final_decision(&self) -> Option<VoteValue> {
        self.final_decision
    }

    pub fn prepare_value(&self) -> Option<VoteValue> {
        self.prepare_value
    }

    pub fn commit_value(&self) -> Option<VoteValue> {
        self.commit_value
    }

    pub fn has_sent_prepare(&self) -> bool {
        self.has_sent_prepare
    }

    pub fn has_sent_commit(&self) -> bool {
        self.has_sent_commit
    }

    pub fn pre_prepare_inbox(&self) -> &[Message] {
        &self.pre_prepare_inbox
    }

    pub fn prepare_inbox(&self) -> &[Message] {
        &self.prepare_inbox
    }

    pub fn commit_inbox(&self) -> &[Message] {
        &self.commit_inbox
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id,
            health: self.health,
            round: self.current_round,
            final_decision: self.final_decision,
        }
    }

    /// Clear inboxes, flags and the decision, and advance to the next round.
    pub fn reset_for_new_round(&mut self) {
        self.pre_prepare_inbox.clear();
        self.prepare_inbox.clear();
        self.commit_inbox.clear();
        self.has_sent_prepare = false;
        self.prepare_pending = false;
        self.prepare_value = None;
        self.has_sent_commit = false;
        self.commit_value = None;
        self.final_decision = None;
        self.current_round += 1;
    }

    /// Value this node will actually emit for `value`.
    fn outgoing(&self, value: VoteValue) -> VoteValue {
        if self.health.is_byzantine() {
            value.negate()
        } else {
            value
        }
    }

    fn accepts(&self, msg: &Message) -> bool {
        if self.health.is_crashed() {
            return false;
        }
        if msg.round() != self.current_round {
            debug!(
                "Node {} ignoring {} (current round {})",
                self.id, msg, self.current_round
            );
            return false;
        }
        true
    }

    /// Commander-only: send a PRE-PREPARE to each peer and schedule the
    /// commander's own PREPARE.
    ///
    /// A Byzantine commander picks each recipient's value independently
    /// according to `equivocation`.
    pub fn broadcast_proposal_as_commander<R: Rng + ?Sized>(
        &mut self,
        value: VoteValue,
        peers: &[NodeId],
        equivocation: CommanderEquivocation,
        rng: &mut R,
    ) -> Vec<AgentOutput> {
        if !self.is_commander() {
            warn!("Node {} is not the commander; proposal ignored", self.id);
            return Vec::new();
        }
        if self.health.is_crashed() {
            warn!("Commander is crashed; proposal ignored");
            return Vec::new();
        }

        let mut outputs = Vec::with_capacity(peers.len());
        for &peer in peers.iter().filter(|&&p| p != self.id) {
            let sent = if self.health.is_byzantine() {
                match equivocation {
                    CommanderEquivocation::Random => {
                        if rng.gen_bool(0.5) {
                            value.negate()
                        } else {
                            value
                        }
                    }
                    CommanderEquivocation::Negate => value.negate(),
                }
            } else {
                value
            };
            outputs.push(AgentOutput::Send(Message::pre_prepare(
                self.id,
                peer,
                sent,
                self.current_round,
            )));
        }

        if !self.has_sent_prepare {
            self.schedule_prepare(self.outgoing(value));
        }
        outputs
    }

    /// Record a PRE-PREPARE. The resulting PREPARE is held until `release_prepare`.
    pub fn receive_pre_prepare(&mut self, msg: &Message) -> Vec<AgentOutput> {
        debug_assert_eq!(msg.kind(), MessageKind::PrePrepare);
        if !self.accepts(msg) {
            return Vec::new();
        }
        if msg.sender() != COMMANDER_ID {
            debug!(
                "Node {} ignoring PRE_PREPARE from non-commander {}",
                self.id,
                msg.sender()
            );
            return Vec::new();
        }
        self.pre_prepare_inbox.push(*msg);

        if !self.has_sent_prepare {
            self.schedule_prepare(self.outgoing(msg.value()));
        }
        Vec::new()
    }

    fn schedule_prepare(&mut self, value: VoteValue) {
        self.prepare_value = Some(value);
        self.has_sent_prepare = true;
        self.prepare_pending = true;
    }

    /// Emit the PREPARE scheduled during the pre-prepare stage, if any.
    /// The node counts its own PREPARE toward its tally.
    pub fn release_prepare(&mut self) -> Vec<AgentOutput> {
        if self.health.is_crashed() || !self.prepare_pending {
            return Vec::new();
        }
        self.prepare_pending = false;
        let value = match self.prepare_value {
            Some(value) => value,
            None => return Vec::new(),
        };

        let msg = Message::prepare(self.id, value, self.current_round);
        self.prepare_inbox.push(msg);

        let mut outputs = vec![AgentOutput::Send(msg)];
        outputs.extend(self.check_prepare_quorum());
        outputs
    }

    pub fn receive_prepare(&mut self, msg: &Message) -> Vec<AgentOutput> {
        debug_assert_eq!(msg.kind(), MessageKind::Prepare);
        if !self.accepts(msg) || self.has_sent_commit {
            return Vec::new();
        }
        self.prepare_inbox.push(*msg);
        self.check_prepare_quorum()
    }

    fn check_prepare_quorum(&mut self) -> Vec<AgentOutput> {
        if self.has_sent_commit {
            return Vec::new();
        }
        match quorum_value(&self.prepare_inbox, self.fault) {
            Some(value) => self.commit_to(value),
            None => Vec::new(),
        }
    }

    fn commit_to(&mut self, prepared: VoteValue) -> Vec<AgentOutput> {
        let value = self.outgoing(prepared);
        let msg = Message::commit(self.id, value, self.current_round);
        self.commit_inbox.push(msg);
        self.has_sent_commit = true;
        self.commit_value = Some(value);

        let mut outputs = vec![AgentOutput::Committed(value), AgentOutput::Send(msg)];
        outputs.extend(self.check_consensus());
        outputs
    }

    pub fn receive_commit(&mut self, msg: &Message) -> Vec<AgentOutput> {
        debug_assert_eq!(msg.kind(), MessageKind::Commit);
        if !self.accepts(msg) {
            return Vec::new();
        }
        self.commit_inbox.push(*msg);
        self.check_consensus()
    }

    fn check_consensus(&mut self) -> Vec<AgentOutput> {
        if self.final_decision.is_some() {
            return Vec::new();
        }
        match quorum_value(&self.commit_inbox, self.fault) {
            Some(value) => {
                self.final_decision = Some(value);
                debug!("Node {} decided {} in round {}", self.id, value, self.current_round);
                vec![AgentOutput::Decided(value)]
            }
            None => Vec::new(),
        }
    }
}

/// Unique senders per value in one phase's inbox.
pub fn tally(inbox: &[Message]) -> BTreeMap<VoteValue, BTreeSet<NodeId>> {
    let mut senders: BTreeMap<VoteValue, BTreeSet<NodeId>> = BTreeMap::new();
    for msg in inbox {
        senders.entry(msg.value()).or_default().insert(msg.sender());
    }
    senders
}

/// The value backed by a quorum of unique senders, if any.
pub fn quorum_value(inbox: &[Message], fault: FaultTolerance) -> Option<VoteValue> {
    let senders = tally(inbox);
    VoteValue::ALL
        .into_iter()
        .find(|value| senders.get(value).map_or(false, |s| fault.is_quorum(s.len())))
}
