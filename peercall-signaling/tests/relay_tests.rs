//! Integration tests for the WebSocket relay

use peercall_core::{ConversationId, PartyId, SessionDescription};
use peercall_signaling::{RelayClient, RelayServer, SignalEvent, SignalingChannel};
use std::time::Duration;

async fn start_relay() -> String {
    let server = RelayServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    format!("ws://{}", addr)
}

fn offer(conversation: &str, from: &str, to: &str) -> SignalEvent {
    SignalEvent::Offer {
        offer: SessionDescription::offer("v=0"),
        from_party_id: PartyId::new(from),
        to_party_id: PartyId::new(to),
        conversation_id: ConversationId::new(conversation),
    }
}

async fn recv_with_timeout(
    subscription: &mut peercall_signaling::Subscription,
) -> Option<SignalEvent> {
    tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn relay_fans_out_to_all_attached_clients() {
    let url = start_relay().await;
    let conversation = ConversationId::new("conv-1");

    let alice = RelayClient::connect(&url).await.unwrap();
    let bob = RelayClient::connect(&url).await.unwrap();

    let mut alice_sub = alice.subscribe(&conversation).await.unwrap();
    let mut bob_sub = bob.subscribe(&conversation).await.unwrap();

    // Give the relay a moment to process the attach frames
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice
        .broadcast(&conversation, offer("conv-1", "alice", "bob"))
        .await
        .unwrap();

    let to_bob = recv_with_timeout(&mut bob_sub).await.unwrap();
    assert_eq!(to_bob.kind(), "offer");
    assert_eq!(to_bob.from_party_id(), &PartyId::new("alice"));

    // The sender receives its own broadcast back
    let echo = recv_with_timeout(&mut alice_sub).await.unwrap();
    assert_eq!(echo.kind(), "offer");
}

#[tokio::test]
async fn relay_keeps_conversations_isolated() {
    let url = start_relay().await;

    let publisher = RelayClient::connect(&url).await.unwrap();
    let listener = RelayClient::connect(&url).await.unwrap();

    let _pub_sub = publisher
        .subscribe(&ConversationId::new("conv-a"))
        .await
        .unwrap();
    let mut other_sub = listener
        .subscribe(&ConversationId::new("conv-b"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher
        .broadcast(
            &ConversationId::new("conv-a"),
            offer("conv-a", "alice", "bob"),
        )
        .await
        .unwrap();

    let leaked = tokio::time::timeout(Duration::from_millis(300), other_sub.recv()).await;
    assert!(leaked.is_err(), "event leaked across conversations");
}

#[tokio::test]
async fn unsubscribed_client_stops_receiving() {
    let url = start_relay().await;
    let conversation = ConversationId::new("conv-1");

    let alice = RelayClient::connect(&url).await.unwrap();
    let bob = RelayClient::connect(&url).await.unwrap();

    let bob_sub = bob.subscribe(&conversation).await.unwrap();
    let mut alice_sub = alice.subscribe(&conversation).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    bob_sub.unsubscribe();
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice
        .broadcast(&conversation, offer("conv-1", "alice", "bob"))
        .await
        .unwrap();

    // Alice still hears her own echo, proving the conversation is live
    assert!(recv_with_timeout(&mut alice_sub).await.is_some());
}
