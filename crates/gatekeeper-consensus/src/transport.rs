//! Delivery seam between the coordinator's router and the agents.
//!
//! The coordinator asks the transport once per (message, recipient) pair.
//! Loss and partitions are injected here without touching agent logic; the
//! base protocol always runs on [`ReliableTransport`].

use crate::message::Message;
use crate::types::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Deliver,
    Drop,
}

pub trait Transport: Send {
    /// Decide whether `message` reaches `to`.
    fn admit(&mut self, message: &Message, to: NodeId) -> Delivery;

    fn name(&self) -> &'static str;
}

/// Every message reaches every addressed node.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReliableTransport;

impl Transport for ReliableTransport {
    fn admit(&mut self, _message: &Message, _to: NodeId) -> Delivery {
        Delivery::Deliver
    }

    fn name(&self) -> &'static str {
        "reliable"
    }
}

/// Simulated network with directional partitions and seeded packet loss.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    /// If (a, b) is present, messages from a to b are dropped.
    partitions: HashSet<(NodeId, NodeId)>,
    packet_loss_rate: f64,
    rng: ChaCha8Rng,
}

impl SimulatedTransport {
    pub fn new(seed: u64) -> Self {
        SimulatedTransport {
            partitions: HashSet::new(),
            packet_loss_rate: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(0x5EED)),
        }
    }

    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions.contains(&(from, to))
    }

    pub fn partition_unidirectional(&mut self, from: NodeId, to: NodeId) {
        self.partitions.insert((from, to));
    }

    pub fn partition_bidirectional(&mut self, a: NodeId, b: NodeId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Cut `node` off from every other node in a roster of `total`.
    pub fn isolate_node(&mut self, node: NodeId, total: usize) {
        for other in (0..total).filter(|&o| o != node) {
            self.partition_bidirectional(node, other);
        }
    }

    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Set the packet loss rate, clamped to 0.0 - 1.0.
    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    pub fn packet_loss_rate(&self) -> f64 {
        self.packet_loss_rate
    }

    fn should_drop_packet(&mut self) -> bool {
        self.packet_loss_rate > 0.0 && self.rng.gen::<f64>() < self.packet_loss_rate
    }
}

impl Transport for SimulatedTransport {
    fn admit(&mut self, message: &Message, to: NodeId) -> Delivery {
        if self.is_partitioned(message.sender(), to) {
            return Delivery::Drop;
        }
        if self.should_drop_packet() {
            return Delivery::Drop;
        }
        Delivery::Deliver
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VoteValue;

    #[test]
    fn test_reliable_always_delivers() {
        let mut transport = ReliableTransport;
        let msg = Message::prepare(0, VoteValue::Open, 1);
        for to in 1..4 {
            assert_eq!(transport.admit(&msg, to), Delivery::Deliver);
        }
    }

    #[test]
    fn test_partitions_are_directional() {
        let mut transport = SimulatedTransport::new(0);
        transport.partition_unidirectional(0, 1);
        assert_eq!(
            transport.admit(&Message::prepare(0, VoteValue::Open, 1), 1),
            Delivery::Drop
        );
        assert_eq!(
            transport.admit(&Message::prepare(1, VoteValue::Open, 1), 0),
            Delivery::Deliver
        );
    }

    #[test]
    fn test_isolate_and_heal() {
        let mut transport = SimulatedTransport::new(0);
        transport.isolate_node(2, 4);
        assert_eq!(transport.partition_count(), 6);
        assert!(transport.is_partitioned(2, 0));
        assert!(transport.is_partitioned(3, 2));
        transport.heal_all();
        assert_eq!(transport.partition_count(), 0);
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let mut transport = SimulatedTransport::new(9);
        transport.set_packet_loss_rate(3.0);
        assert_eq!(transport.packet_loss_rate(), 1.0);
        let msg = Message::commit(1, VoteValue::Locked, 1);
        assert!((0..20).all(|_| transport.admit(&msg, 0) == Delivery::Drop));
    }
}
