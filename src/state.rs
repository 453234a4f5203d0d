use crate::config::Config;
use crate::middleware::auth::TokenVerifier;
use crate::services::{
    ConversationService, MessagePipeline, ProfileDirectoryClient, ReadCursorService,
};
use crate::store::Store;
use crate::websocket::RoomRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub registry: RoomRegistry,
    pub verifier: TokenVerifier,
    pub profiles: ProfileDirectoryClient,
    pub conversations: ConversationService,
    pub pipeline: MessagePipeline,
    pub read_cursors: ReadCursorService,
}
