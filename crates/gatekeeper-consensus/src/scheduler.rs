//! Two-stage deferred delivery.
//!
//! Messages wait in one FIFO per protocol stage. The coordinator drains the
//! PRE-PREPARE stage completely, releases every node's pending PREPARE (the
//! barrier), then settles the PREPARE and COMMIT stages until nothing is
//! pending. No node's PREPARE can observe a partially delivered PRE-PREPARE
//! broadcast.

use crate::message::{Message, MessageKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Upper bound on settle passes for one round: PRE-PREPARE, PREPARE, COMMIT.
pub const MAX_SETTLE_PASSES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    PrePrepare,
    Prepare,
    Commit,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::PrePrepare, Stage::Prepare, Stage::Commit];

    pub fn of(kind: MessageKind) -> Stage {
        match kind {
            MessageKind::PrePrepare => Stage::PrePrepare,
            MessageKind::Prepare => Stage::Prepare,
            MessageKind::Commit => Stage::Commit,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeliveryQueue {
    pre_prepare: VecDeque<Message>,
    prepare: VecDeque<Message>,
    commit: VecDeque<Message>,
    passes: u32,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&mut self, stage: Stage) -> &mut VecDeque<Message> {
        match stage {
            Stage::PrePrepare => &mut self.pre_prepare,
            Stage::Prepare => &mut self.prepare,
            Stage::Commit => &mut self.commit,
        }
    }

    fn lane_ref(&self, stage: Stage) -> &VecDeque<Message> {
        match stage {
            Stage::PrePrepare => &self.pre_prepare,
            Stage::Prepare => &self.prepare,
            Stage::Commit => &self.commit,
        }
    }

    /// Enqueue a message on the lane for its kind.
    pub fn push(&mut self, message: Message) {
        self.lane(Stage::of(message.kind())).push_back(message);
    }

    pub fn pop(&mut self, stage: Stage) -> Option<Message> {
        self.lane(stage).pop_front()
    }

    pub fn stage_len(&self, stage: Stage) -> usize {
        self.lane_ref(stage).len()
    }

    pub fn len(&self) -> usize {
        Stage::ORDER.iter().map(|&s| self.stage_len(s)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest stage that still has pending messages.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ORDER
            .into_iter()
            .find(|&stage| self.stage_len(stage) > 0)
    }

    /// Mark the start of a settle pass and return its ordinal.
    pub fn begin_pass(&mut self) -> u32 {
        self.passes += 1;
        self.passes
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Drop everything and reset the pass counter for a new round.
    pub fn clear(&mut self) {
        self.pre_prepare.clear();
        self.prepare.clear();
        self.commit.clear();
        self.passes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VoteValue;

    #[test]
    fn test_messages_land_on_their_stage() {
        let mut queue = DeliveryQueue::new();
        queue.push(Message::commit(1, VoteValue::Open, 1));
        queue.push(Message::prepare(2, VoteValue::Open, 1));
        queue.push(Message::pre_prepare(0, 3, VoteValue::Open, 1));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next_stage(), Some(Stage::PrePrepare));
        assert_eq!(queue.pop(Stage::PrePrepare).map(|m| m.sender()), Some(0));
        assert_eq!(queue.next_stage(), Some(Stage::Prepare));
        queue.pop(Stage::Prepare);
        assert_eq!(queue.next_stage(), Some(Stage::Commit));
        queue.pop(Stage::Commit);
        assert!(queue.is_empty());
        assert_eq!(queue.next_stage(), None);
    }

    #[test]
    fn test_lanes_are_fifo() {
        let mut queue = DeliveryQueue::new();
        for sender in 0..4 {
            queue.push(Message::prepare(sender, VoteValue::Locked, 1));
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop(Stage::Prepare))
            .map(|m| m.sender())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_clear_resets_passes() {
        let mut queue = DeliveryQueue::new();
        queue.begin_pass();
        queue.begin_pass();
        queue.push(Message::prepare(0, VoteValue::Open, 1));
        queue.clear();
        assert_eq!(queue.passes(), 0);
        assert!(queue.is_empty());
    }
}
