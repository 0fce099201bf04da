// NOTIFICATION SURFACE
// Structured event records pushed to subscribers (presentation layers, tests).
//
// SAFETY INVARIANTS:
// 1. Publishing never influences protocol state
// 2. Events are published in the order the coordinator observes them
// 3. A slow or absent subscriber never blocks a round

use crate::admin::AttackSignal;
use crate::coordinator::RoundResult;
use crate::error::RoundFailure;
use crate::message::Message;
use crate::types::{NodeHealth, NodeId, SecurityLevel, VoteValue};
use log::{debug, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What moved the door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoorChangeCause {
    Consensus,
    Command,
    Exploit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConsensusEvent {
    /// A node handed a message to the network.
    MessageSent { message: Message },

    StateChanged {
        node: NodeId,
        old: NodeHealth,
        new: NodeHealth,
    },

    /// A node committed to a value (sent its COMMIT).
    DecisionMade { node: NodeId, value: VoteValue },

    /// A node finalized its decision for the round.
    ConsensusReached { node: NodeId, value: VoteValue },

    RoundStarted { round: u64 },

    RoundCompleted { result: RoundResult },

    ConsensusAchieved { round: u64, value: VoteValue },

    ConsensusFailed { round: u64, reason: RoundFailure },

    FailsafeActivated { failed_rounds: u32 },

    SecurityLevelChanged {
        from: SecurityLevel,
        to: SecurityLevel,
    },

    DoorStateChanged {
        from: VoteValue,
        to: VoteValue,
        cause: DoorChangeCause,
    },

    AttackDetected { signals: Vec<AttackSignal> },
}

/// Subscriber interface for consensus notifications.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ConsensusEvent);
}

/// Renders every event through the `log` facade at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &ConsensusEvent) {
        match event {
            ConsensusEvent::MessageSent { message } => trace!("sent {}", message),
            ConsensusEvent::StateChanged { node, old, new } => {
                trace!("Node {}: {} -> {}", node, old, new)
            }
            ConsensusEvent::DecisionMade { node, value } => {
                trace!("Node {} commits {}", node, value)
            }
            ConsensusEvent::ConsensusReached { node, value } => {
                trace!("Node {} decided {}", node, value)
            }
            ConsensusEvent::RoundStarted { round } => trace!("round {} started", round),
            ConsensusEvent::RoundCompleted { result } => {
                trace!("round {} completed (success={})", result.round, result.success)
            }
            ConsensusEvent::ConsensusAchieved { round, value } => {
                trace!("round {}: consensus on {}", round, value)
            }
            ConsensusEvent::ConsensusFailed { round, reason } => {
                trace!("round {}: {}", round, reason)
            }
            ConsensusEvent::FailsafeActivated { failed_rounds } => {
                trace!("failsafe activated after {} failed rounds", failed_rounds)
            }
            ConsensusEvent::SecurityLevelChanged { from, to } => {
                trace!("security level {} -> {}", from, to)
            }
            ConsensusEvent::DoorStateChanged { from, to, cause } => {
                trace!("door {} -> {} ({:?})", from, to, cause)
            }
            ConsensusEvent::AttackDetected { signals } => trace!("attack detected: {:?}", signals),
        }
    }
}

/// Keeps every event in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ConsensusEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConsensusEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<ConsensusEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Count events matching a predicate.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ConsensusEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &ConsensusEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ConsensusEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConsensusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: &ConsensusEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("event receiver dropped; discarding event");
        }
    }
}

/// Fan-out to every registered sink.
#[derive(Default, Clone)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn publish(&self, event: ConsensusEvent) {
        for sink in &self.sinks {
            sink.publish(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sinks.len())
            .finish()
    }
}
