pub mod conversation_service;
pub mod message_service;
pub mod profile_client;
pub mod read_cursor;
pub mod retention;

pub use conversation_service::ConversationService;
pub use message_service::{MessagePipeline, SendLocks};
pub use profile_client::{Profile, ProfileDirectoryClient};
pub use read_cursor::ReadCursorService;
