// PROTOCOL MESSAGES
// Immutable records exchanged during the three-phase commit.

use crate::types::{NodeId, VoteValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message types for the 3-phase protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    /// Commander proposes a value to one lieutenant
    PrePrepare,

    /// Node broadcasts the value it received from the commander
    Prepare,

    /// Node broadcasts the value it saw a prepare quorum for
    Commit,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PrePrepare => "PRE_PREPARE",
            MessageKind::Prepare => "PREPARE",
            MessageKind::Commit => "COMMIT",
        }
    }
}

/// Intended receiver of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Node(NodeId),
    /// Every node except the sender.
    Broadcast,
}

/// One protocol message. Fields are private so a message cannot change after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    kind: MessageKind,
    sender: NodeId,
    recipient: Recipient,
    value: VoteValue,
    round: u64,
}

impl Message {
    pub fn new(
        kind: MessageKind,
        sender: NodeId,
        recipient: Recipient,
        value: VoteValue,
        round: u64,
    ) -> Self {
        Message {
            kind,
            sender,
            recipient,
            value,
            round,
        }
    }

    pub fn pre_prepare(sender: NodeId, to: NodeId, value: VoteValue, round: u64) -> Self {
        Self::new(MessageKind::PrePrepare, sender, Recipient::Node(to), value, round)
    }

    pub fn prepare(sender: NodeId, value: VoteValue, round: u64) -> Self {
        Self::new(MessageKind::Prepare, sender, Recipient::Broadcast, value, round)
    }

    pub fn commit(sender: NodeId, value: VoteValue, round: u64) -> Self {
        Self::new(MessageKind::Commit, sender, Recipient::Broadcast, value, round)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sender(&self) -> NodeId {
        self.sender
    }

    pub fn recipient(&self) -> Recipient {
        self.recipient
    }

    pub fn value(&self) -> VoteValue {
        self.value
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.recipient, Recipient::Broadcast)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.recipient {
            Recipient::Node(to) => write!(
                f,
                "{} from Node {} to Node {}: {} (round {})",
                self.kind.as_str(),
                self.sender,
                to,
                self.value,
                self.round
            ),
            Recipient::Broadcast => write!(
                f,
                "{} from Node {} to all: {} (round {})",
                self.kind.as_str(),
                self.sender,
                self.value,
                self.round
            ),
        }
    }
}

/// A message as it was handed to one concrete receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivered {
    pub message: Message,
    pub to: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_recipient() {
        let pp = Message::pre_prepare(0, 2, VoteValue::Open, 1);
        assert_eq!(pp.kind(), MessageKind::PrePrepare);
        assert_eq!(pp.recipient(), Recipient::Node(2));
        assert!(!pp.is_broadcast());

        let prepare = Message::prepare(3, VoteValue::Locked, 1);
        assert!(prepare.is_broadcast());
        assert_eq!(prepare.sender(), 3);
    }

    #[test]
    fn test_display_format() {
        let commit = Message::commit(1, VoteValue::Open, 4);
        assert_eq!(commit.to_string(), "COMMIT from Node 1 to all: OPEN (round 4)");
    }
}
