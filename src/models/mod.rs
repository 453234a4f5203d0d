pub mod conversation;
pub mod message;
pub mod participant;

pub use conversation::{Conversation, ConversationKind, ConversationMetadata};
pub use message::{Message, MessageContent, MessageKind};
pub use participant::{Participant, ParticipantRole};

/// Reserved sender id for system messages ("joined", "left", "created").
/// Seeded into the users table by migration; never a participant.
pub const SYSTEM_USER_ID: &str = "system";
