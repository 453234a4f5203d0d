use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

pub mod frames;
pub mod session;

use frames::OutboundFrame;

/// Unique identifier for a live connection. Each socket gets one when it
/// authenticates; it is the key for leave/eviction bookkeeping.
pub type ConnectionId = Uuid;

/// A live connection as seen by the registry: the bounded outbound queue
/// (one per connection, shared across all of its rooms) and the shutdown
/// signal fired on eviction.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    sender: Sender<OutboundFrame>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(user_id: String, queue_capacity: usize) -> (Self, Receiver<OutboundFrame>) {
        let (tx, rx) = channel(queue_capacity);
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            sender: tx,
            shutdown: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    /// Non-blocking enqueue; the caller decides what a full queue means.
    pub fn try_deliver(&self, frame: OutboundFrame) -> Result<(), TrySendError<OutboundFrame>> {
        self.sender.try_send(frame)
    }

    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Uses `notify_one` so the permit is stored if the outbound pump is not
    /// currently parked on the signal.
    pub fn fire_shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[derive(Default)]
struct Room {
    subscribers: Mutex<Vec<ConnectionHandle>>,
}

/// In-memory mapping of conversation -> live subscribed connections.
///
/// The per-room mutex is the serialization point required for broadcast
/// ordering: two broadcasts to the same conversation are observed by every
/// subscriber in lock-acquisition order. Enqueueing is `try_send`, so the
/// lock is never held across blocking outbound I/O; a full queue evicts that
/// subscriber (SlowConsumer) without stalling the rest of the room.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<Uuid, Arc<Room>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a conversation. Idempotent per connection.
    pub async fn join(&self, conversation_id: Uuid, handle: ConnectionHandle) {
        loop {
            let room = {
                let mut rooms = self.rooms.write().await;
                rooms.entry(conversation_id).or_default().clone()
            };
            {
                let mut subscribers = room.subscribers.lock().await;
                if !subscribers.iter().any(|s| s.id == handle.id) {
                    subscribers.push(handle.clone());
                }
            }
            // A concurrent leave may have emptied this room and dropped it
            // from the map between our fetch and our push; if so the push
            // landed in an orphaned room and must be redone.
            let still_registered = {
                let rooms = self.rooms.read().await;
                rooms
                    .get(&conversation_id)
                    .map(|current| Arc::ptr_eq(current, &room))
                    .unwrap_or(false)
            };
            if still_registered {
                break;
            }
        }
    }

    /// Unsubscribe one connection from one conversation. Idempotent.
    pub async fn leave(&self, conversation_id: Uuid, connection_id: ConnectionId) {
        let room = {
            let rooms = self.rooms.read().await;
            match rooms.get(&conversation_id) {
                Some(room) => room.clone(),
                None => return,
            }
        };
        let empty = {
            let mut subscribers = room.subscribers.lock().await;
            subscribers.retain(|s| s.id != connection_id);
            subscribers.is_empty()
        };
        if empty {
            self.drop_room_if_empty(conversation_id).await;
        }
    }

    /// Unsubscribe a connection from every room. Invoked on every disconnect
    /// path; safe to call more than once.
    pub async fn leave_all(&self, connection_id: ConnectionId) {
        let snapshot: Vec<(Uuid, Arc<Room>)> = {
            let rooms = self.rooms.read().await;
            rooms.iter().map(|(id, room)| (*id, room.clone())).collect()
        };
        for (conversation_id, room) in snapshot {
            let empty = {
                let mut subscribers = room.subscribers.lock().await;
                subscribers.retain(|s| s.id != connection_id);
                subscribers.is_empty()
            };
            if empty {
                self.drop_room_if_empty(conversation_id).await;
            }
        }
    }

    /// Remove every connection of one user from one room. Used when a
    /// participant is removed from the conversation, so join-time
    /// authorization stays sufficient.
    pub async fn force_leave_user(&self, conversation_id: Uuid, user_id: &str) {
        let room = {
            let rooms = self.rooms.read().await;
            match rooms.get(&conversation_id) {
                Some(room) => room.clone(),
                None => return,
            }
        };
        let empty = {
            let mut subscribers = room.subscribers.lock().await;
            subscribers.retain(|s| s.user_id != user_id);
            subscribers.is_empty()
        };
        if empty {
            self.drop_room_if_empty(conversation_id).await;
        }
    }

    /// Fan one event out to every current subscriber of the conversation.
    ///
    /// Dead subscribers (receiver dropped) are pruned in place. A subscriber
    /// whose queue is full is evicted from every room and its shutdown
    /// signal fired; the send that triggered the broadcast is unaffected.
    pub async fn broadcast(&self, conversation_id: Uuid, frame: &OutboundFrame) {
        let room = {
            let rooms = self.rooms.read().await;
            match rooms.get(&conversation_id) {
                Some(room) => room.clone(),
                None => return,
            }
        };

        let mut evicted: Vec<ConnectionHandle> = Vec::new();
        {
            let mut subscribers = room.subscribers.lock().await;
            subscribers.retain(|subscriber| match subscriber.try_deliver(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Closed(_)) => false,
                Err(TrySendError::Full(_)) => {
                    evicted.push(subscriber.clone());
                    false
                }
            });
        }

        for slow in evicted {
            tracing::warn!(
                connection_id = %slow.id,
                user_id = %slow.user_id,
                %conversation_id,
                "slow consumer: outbound queue full, evicting connection"
            );
            slow.fire_shutdown();
            self.leave_all(slow.id).await;
        }
    }

    pub async fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        let room = {
            let rooms = self.rooms.read().await;
            match rooms.get(&conversation_id) {
                Some(room) => room.clone(),
                None => return 0,
            }
        };
        let subscribers = room.subscribers.lock().await;
        subscribers.len()
    }

    async fn drop_room_if_empty(&self, conversation_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(&conversation_id) {
            if room.subscribers.lock().await.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }
}
