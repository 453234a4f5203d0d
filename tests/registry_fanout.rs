//! Fan-out behavior of the room registry: ordering, idempotent membership,
//! and slow-consumer eviction. No database or network required.

use std::time::Duration;

use chat_service::websocket::frames::OutboundFrame;
use chat_service::websocket::{ConnectionHandle, RoomRegistry};
use chrono::Utc;
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

fn frame(conversation_id: Uuid, message_id: i64) -> OutboundFrame {
    OutboundFrame::NewMessage {
        message_id,
        conversation_id,
        sender_id: "u1".into(),
        content: format!("message {message_id}"),
        message_type: chat_service::models::MessageKind::Text,
        sent_at: Utc::now(),
    }
}

fn message_id(frame: &OutboundFrame) -> i64 {
    match frame {
        OutboundFrame::NewMessage { message_id, .. } => *message_id,
        other => panic!("expected new_message, got {other:?}"),
    }
}

async fn drain(rx: &mut Receiver<OutboundFrame>, expected: usize) -> Vec<i64> {
    let mut out = Vec::with_capacity(expected);
    while out.len() < expected {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed early");
        out.push(message_id(&frame));
    }
    out
}

#[tokio::test]
async fn every_subscriber_receives_every_frame_in_order() {
    let registry = RoomRegistry::new();
    let conversation = Uuid::new_v4();

    let mut receivers = Vec::new();
    for i in 0..3 {
        let (handle, rx) = ConnectionHandle::new(format!("user-{i}"), 64);
        registry.join(conversation, handle).await;
        receivers.push(rx);
    }

    for id in 1..=20 {
        registry.broadcast(conversation, &frame(conversation, id)).await;
    }

    for rx in &mut receivers {
        let got = drain(rx, 20).await;
        assert_eq!(got, (1..=20).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn concurrent_broadcasts_are_observed_in_one_shared_order() {
    let registry = RoomRegistry::new();
    let conversation = Uuid::new_v4();

    let (h1, mut rx1) = ConnectionHandle::new("a".into(), 256);
    let (h2, mut rx2) = ConnectionHandle::new("b".into(), 256);
    registry.join(conversation, h1).await;
    registry.join(conversation, h2).await;

    let writer = |registry: RoomRegistry, ids: Vec<i64>| async move {
        for id in ids {
            registry.broadcast(conversation, &frame(conversation, id)).await;
        }
    };
    let t1 = tokio::spawn(writer(registry.clone(), (1..=50).collect()));
    let t2 = tokio::spawn(writer(registry.clone(), (51..=100).collect()));
    t1.await.unwrap();
    t2.await.unwrap();

    let order1 = drain(&mut rx1, 100).await;
    let order2 = drain(&mut rx2, 100).await;
    assert_eq!(order1, order2);

    let mut sorted = order1.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=100).collect::<Vec<_>>());
}

#[tokio::test]
async fn join_is_idempotent_per_connection() {
    let registry = RoomRegistry::new();
    let conversation = Uuid::new_v4();

    let (handle, mut rx) = ConnectionHandle::new("u1".into(), 16);
    registry.join(conversation, handle.clone()).await;
    registry.join(conversation, handle.clone()).await;
    assert_eq!(registry.subscriber_count(conversation).await, 1);

    registry.broadcast(conversation, &frame(conversation, 1)).await;
    assert_eq!(drain(&mut rx, 1).await, vec![1]);
    // A second delivery would mean the duplicate join registered twice.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "received a duplicate frame"
    );
}

#[tokio::test]
async fn leave_then_rejoin_restores_subscription() {
    let registry = RoomRegistry::new();
    let conversation = Uuid::new_v4();

    let (handle, mut rx) = ConnectionHandle::new("u1".into(), 16);
    registry.join(conversation, handle.clone()).await;
    registry.leave(conversation, handle.id).await;
    // Idempotent: leaving twice is fine.
    registry.leave(conversation, handle.id).await;
    assert_eq!(registry.subscriber_count(conversation).await, 0);

    registry.broadcast(conversation, &frame(conversation, 1)).await;

    registry.join(conversation, handle.clone()).await;
    registry.broadcast(conversation, &frame(conversation, 2)).await;

    // Only the post-rejoin frame arrives.
    assert_eq!(drain(&mut rx, 1).await, vec![2]);
}

#[tokio::test]
async fn leave_all_clears_every_room() {
    let registry = RoomRegistry::new();
    let room_a = Uuid::new_v4();
    let room_b = Uuid::new_v4();

    let (handle, _rx) = ConnectionHandle::new("u1".into(), 16);
    registry.join(room_a, handle.clone()).await;
    registry.join(room_b, handle.clone()).await;

    registry.leave_all(handle.id).await;
    registry.leave_all(handle.id).await; // idempotent

    assert_eq!(registry.subscriber_count(room_a).await, 0);
    assert_eq!(registry.subscriber_count(room_b).await, 0);
}

#[tokio::test]
async fn force_leave_user_removes_their_connections_only() {
    let registry = RoomRegistry::new();
    let conversation = Uuid::new_v4();

    let (removed, _rx1) = ConnectionHandle::new("removed".into(), 16);
    let (stays, _rx2) = ConnectionHandle::new("stays".into(), 16);
    registry.join(conversation, removed).await;
    registry.join(conversation, stays).await;

    registry.force_leave_user(conversation, "removed").await;
    assert_eq!(registry.subscriber_count(conversation).await, 1);
}

#[tokio::test]
async fn slow_consumer_is_evicted_without_stalling_the_room() {
    let registry = RoomRegistry::new();
    let conversation = Uuid::new_v4();

    // The slow connection never drains its tiny queue.
    let (slow, _slow_rx) = ConnectionHandle::new("slow".into(), 4);
    let slow_shutdown = slow.shutdown_signal();
    let (healthy, mut healthy_rx) = ConnectionHandle::new("healthy".into(), 1024);

    registry.join(conversation, slow.clone()).await;
    registry.join(conversation, healthy).await;

    let total = 1000;
    for id in 1..=total {
        registry.broadcast(conversation, &frame(conversation, id)).await;
    }

    // The healthy subscriber saw everything, in order.
    let got = drain(&mut healthy_rx, total as usize).await;
    assert_eq!(got, (1..=total).collect::<Vec<_>>());

    // The slow one was evicted and signalled to shut down.
    assert_eq!(registry.subscriber_count(conversation).await, 1);
    tokio::time::timeout(Duration::from_secs(1), slow_shutdown.notified())
        .await
        .expect("slow consumer shutdown signal not fired");

    // Eviction removed it from every room, so later broadcasts skip it.
    registry.broadcast(conversation, &frame(conversation, total + 1)).await;
    assert_eq!(drain(&mut healthy_rx, 1).await, vec![total + 1]);
}
