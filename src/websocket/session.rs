//! Per-connection lifecycle: authenticate within the handshake window,
//! dispatch inbound frames sequentially, pump outbound frames from the
//! bounded queue, and leave every room on the way out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::Receiver;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{AppError, AppResult, ErrorCode};
use crate::middleware::auth::Identity;
use crate::middleware::guards::require_participant;
use crate::state::AppState;
use crate::websocket::frames::{InboundFrame, OutboundFrame};
use crate::websocket::ConnectionHandle;

/// Repeated typing_start frames for the same conversation are coalesced
/// within this window.
const TYPING_COALESCE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub token: Option<String>,
}

pub async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ChatParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = params.token.or_else(|| bearer_from_headers(&headers));
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let identity = match authenticate(&mut socket, &state, token).await {
        Ok(identity) => identity,
        Err(e) => {
            let frame = OutboundFrame::error(e.code(), e.to_string());
            let _ = socket.send(Message::Text(frame.to_json())).await;
            return;
        }
    };

    // First-seen insertion; user records are otherwise externally owned.
    if let Err(e) = state.store.insert_user(&identity.user_id).await {
        tracing::error!(error = %e, user_id = %identity.user_id, "user upsert failed on connect");
        let frame = OutboundFrame::error(ErrorCode::StoreUnavailable, "try again later");
        let _ = socket.send(Message::Text(frame.to_json())).await;
        return;
    }

    let (handle, rx) = ConnectionHandle::new(
        identity.user_id.clone(),
        state.config.websocket.outbound_queue,
    );

    tracing::info!(connection_id = %handle.id, user_id = %identity.user_id, "socket session started");

    let _ = handle.try_deliver(OutboundFrame::Connected {
        user_id: identity.user_id.clone(),
        message: "connected".to_string(),
    });

    let last_seen = Arc::new(StdMutex::new(Instant::now()));
    let (sink, stream) = socket.split();
    let pump = tokio::spawn(outbound_pump(
        sink,
        rx,
        handle.shutdown_signal(),
        state.config.websocket.heartbeat_interval,
        last_seen.clone(),
    ));

    inbound_loop(stream, &state, &handle, last_seen).await;

    // Single exit point: every disconnect path funnels through here.
    state.registry.leave_all(handle.id).await;
    handle.fire_shutdown();
    let _ = pump.await;

    tracing::info!(connection_id = %handle.id, user_id = %identity.user_id, "socket session closed");
}

/// Resolve the caller's identity from the handshake token, or from an `auth`
/// frame arriving within the auth window.
async fn authenticate(
    socket: &mut WebSocket,
    state: &AppState,
    token: Option<String>,
) -> Result<Identity, AppError> {
    if let Some(token) = token {
        return state.verifier.verify(&token);
    }

    let waited = tokio::time::timeout(state.config.websocket.auth_timeout, async {
        while let Some(msg) = socket.recv().await {
            match msg {
                Ok(Message::Text(text)) => {
                    return match serde_json::from_str::<InboundFrame>(&text) {
                        Ok(InboundFrame::Auth { token }) => state.verifier.verify(&token),
                        Ok(_) => Err(AppError::AuthMissing),
                        Err(_) => Err(AppError::AuthMalformed),
                    };
                }
                Ok(Message::Close(_)) | Err(_) => return Err(AppError::AuthMissing),
                Ok(_) => continue,
            }
        }
        Err(AppError::AuthMissing)
    })
    .await;

    match waited {
        Ok(result) => result,
        Err(_elapsed) => Err(AppError::AuthMissing),
    }
}

/// Drains the bounded queue into the socket and owns the heartbeat. Ends on
/// socket failure, queue closure, eviction, or a silent peer.
async fn outbound_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: Receiver<OutboundFrame>,
    shutdown: Arc<Notify>,
    heartbeat: Duration,
    last_seen: Arc<StdMutex<Instant>>,
) {
    let mut ping = tokio::time::interval(heartbeat);
    ping.tick().await;

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(frame) => {
                    if sink.send(Message::Text(frame.to_json())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.notified() => break,
            _ = ping.tick() => {
                let idle = last_seen.lock().map(|seen| seen.elapsed()).unwrap_or(Duration::ZERO);
                if idle > heartbeat * 2 {
                    tracing::warn!("heartbeat missed, closing connection");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Inbound frames are handled one at a time; a slow handler stalls this
/// connection only.
async fn inbound_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    handle: &ConnectionHandle,
    last_seen: Arc<StdMutex<Instant>>,
) {
    let mut typing_last: HashMap<Uuid, Instant> = HashMap::new();

    while let Some(msg) = stream.next().await {
        if let Ok(mut seen) = last_seen.lock() {
            *seen = Instant::now();
        }
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => handle_frame(state, handle, &mut typing_last, frame).await,
                Err(e) => {
                    tracing::debug!(error = %e, "unparseable inbound frame");
                    let _ = handle.try_deliver(OutboundFrame::error(
                        ErrorCode::ContentInvalid,
                        "unrecognized frame",
                    ));
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                tracing::debug!("binary frames not supported");
            }
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }
}

async fn handle_frame(
    state: &AppState,
    handle: &ConnectionHandle,
    typing_last: &mut HashMap<Uuid, Instant>,
    frame: InboundFrame,
) {
    let user_id = handle.user_id.as_str();

    let result: AppResult<()> = match frame {
        // Already authenticated; a repeated auth frame is a no-op.
        InboundFrame::Auth { .. } => Ok(()),

        InboundFrame::JoinConversation { conversation_id } => {
            join_conversation(state, handle, conversation_id).await
        }

        InboundFrame::LeaveConversation { conversation_id } => {
            state.registry.leave(conversation_id, handle.id).await;
            Ok(())
        }

        InboundFrame::SendMessage { conversation_id, content, message_type } => state
            .pipeline
            .send(conversation_id, user_id, &content, message_type.as_deref())
            .await
            .map(|_| ()),

        InboundFrame::TypingStart { conversation_id } => {
            let now = Instant::now();
            let coalesced = typing_last
                .get(&conversation_id)
                .is_some_and(|last| now.duration_since(*last) < TYPING_COALESCE);
            if coalesced {
                Ok(())
            } else {
                typing_last.insert(conversation_id, now);
                state.pipeline.typing(conversation_id, user_id, true).await
            }
        }

        InboundFrame::TypingStop { conversation_id } => {
            typing_last.remove(&conversation_id);
            state.pipeline.typing(conversation_id, user_id, false).await
        }

        InboundFrame::MarkRead { conversation_id, message_id } => state
            .read_cursors
            .mark_read(user_id, conversation_id, message_id)
            .await
            .map(|_| ()),
    };

    if let Err(e) = result {
        let _ = handle.try_deliver(OutboundFrame::error(e.code(), e.to_string()));
    }
}

/// Authorize against the participant table, register in the room, echo the
/// ack to this connection only. Idempotent.
async fn join_conversation(
    state: &AppState,
    handle: &ConnectionHandle,
    conversation_id: Uuid,
) -> AppResult<()> {
    require_participant(&state.store, conversation_id, &handle.user_id).await?;
    state.registry.join(conversation_id, handle.clone()).await;
    let _ = handle.try_deliver(OutboundFrame::JoinedConversation { conversation_id });
    Ok(())
}
