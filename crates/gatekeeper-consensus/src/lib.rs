pub mod types;
pub mod error;
pub mod message;
pub mod config;
pub mod events;
pub mod agent;
pub mod scheduler;
pub mod transport;
pub mod coordinator;
pub mod admin;
pub mod session;
pub mod reference;
pub mod scenario;
pub mod safety_invariants;

pub use types::{
    FaultTolerance, NetworkHealth, NodeHealth, NodeId, NodeSnapshot, Phase, SecurityLevel,
    VoteValue, COMMANDER_ID,
};
pub use error::{AdminError, ConfigError, RoundFailure};
pub use message::{Delivered, Message, MessageKind, Recipient};
pub use config::{CommanderEquivocation, NetworkConfig, DEFAULT_FAILSAFE_THRESHOLD};
pub use events::{
    ChannelSink, ConsensusEvent, DoorChangeCause, EventBus, EventSink, LogSink, MemorySink,
};
pub use agent::{AgentOutput, NodeAgent};
pub use transport::{Delivery, ReliableTransport, SimulatedTransport, Transport};
pub use coordinator::{MessageCounts, NetworkCoordinator, RoundResult, VoteTally};
pub use admin::{ActionLog, ActionOutcome, AdminActions, AttackSignal, DoorOverride};
pub use session::ConsensusSession;
pub use reference::{ReferenceOutcome, ReferenceReferee};
pub use scenario::{ScenarioReport, ScenarioStep};
