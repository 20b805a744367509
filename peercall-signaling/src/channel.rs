//! Signaling channel adapter and the in-process hub

use crate::error::SignalingError;
use crate::protocol::SignalEvent;
use dashmap::DashMap;
use peercall_core::ConversationId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A realtime publish/subscribe channel scoped by conversation.
///
/// Broadcasts are fire-and-forget with no delivery confirmation and may be
/// echoed back to their sender; subscribers receive events in per-sender
/// order only.
#[async_trait::async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Subscribe to a conversation's events
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Subscription, SignalingError>;

    /// Publish an event to every current subscriber of the conversation
    async fn broadcast(
        &self,
        conversation_id: &ConversationId,
        event: SignalEvent,
    ) -> Result<(), SignalingError>;
}

type UnsubscribeFn = Box<dyn FnOnce() + Send>;

/// Handle over one conversation subscription.
///
/// The channel listener is detached exactly once, on explicit
/// [`Subscription::unsubscribe`] or on drop, so repeated call attempts in
/// the same conversation never leak listeners.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<SignalEvent>,
    on_unsubscribe: Option<UnsubscribeFn>,
}

impl Subscription {
    /// Create a subscription from a receiver and a detach action
    pub fn new(
        receiver: mpsc::UnboundedReceiver<SignalEvent>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    /// Wait for the next event; `None` once the channel is gone
    pub async fn recv(&mut self) -> Option<SignalEvent> {
        self.receiver.recv().await
    }

    /// Take the next already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<SignalEvent> {
        self.receiver.try_recv().ok()
    }

    /// Detach from the channel now instead of at drop
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(unsubscribe) = self.on_unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("detached", &self.on_unsubscribe.is_none())
            .finish()
    }
}

struct HubSubscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<SignalEvent>,
}

#[derive(Default)]
struct HubInner {
    topics: DashMap<ConversationId, Vec<HubSubscriber>>,
}

/// In-process [`SignalingChannel`] connecting sessions in the same process.
///
/// Mirrors the semantics of the hosted realtime channel the call widget
/// used: per-conversation topics, and broadcasts delivered to every current
/// subscriber including the sender.
#[derive(Clone, Default)]
pub struct LocalSignalingHub {
    inner: Arc<HubInner>,
}

impl LocalSignalingHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Current subscriber count for a conversation
    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        self.inner
            .topics
            .get(conversation_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for LocalSignalingHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSignalingHub")
            .field("topics", &self.inner.topics.len())
            .finish()
    }
}

#[async_trait::async_trait]
impl SignalingChannel for LocalSignalingHub {
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Subscription, SignalingError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner
            .topics
            .entry(conversation_id.clone())
            .or_default()
            .push(HubSubscriber { id, sender });
        tracing::debug!(%conversation_id, subscriber = %id, "subscribed to conversation");

        let inner = Arc::clone(&self.inner);
        let conversation = conversation_id.clone();
        Ok(Subscription::new(receiver, move || {
            if let Some(mut subscribers) = inner.topics.get_mut(&conversation) {
                subscribers.retain(|s| s.id != id);
            }
            inner
                .topics
                .remove_if(&conversation, |_, subscribers| subscribers.is_empty());
            tracing::debug!(%conversation, subscriber = %id, "unsubscribed from conversation");
        }))
    }

    async fn broadcast(
        &self,
        conversation_id: &ConversationId,
        event: SignalEvent,
    ) -> Result<(), SignalingError> {
        let Some(mut subscribers) = self.inner.topics.get_mut(conversation_id) else {
            tracing::debug!(%conversation_id, kind = event.kind(), "broadcast with no subscribers");
            return Ok(());
        };
        // Prune subscribers whose receiving side is gone
        subscribers.retain(|s| s.sender.send(event.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peercall_core::PartyId;

    fn end_event(conversation: &str, from: &str) -> SignalEvent {
        SignalEvent::End {
            from_party_id: PartyId::new(from),
            to_party_id: PartyId::new("other"),
            conversation_id: ConversationId::new(conversation),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers_including_sender() {
        let hub = LocalSignalingHub::new();
        let conversation = ConversationId::new("conv-1");

        let mut first = hub.subscribe(&conversation).await.unwrap();
        let mut second = hub.subscribe(&conversation).await.unwrap();
        assert_eq!(hub.subscriber_count(&conversation), 2);

        hub.broadcast(&conversation, end_event("conv-1", "alice"))
            .await
            .unwrap();

        assert!(first.try_recv().is_some());
        assert!(second.try_recv().is_some());
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let hub = LocalSignalingHub::new();
        let one = ConversationId::new("conv-1");
        let two = ConversationId::new("conv-2");

        let mut subscriber = hub.subscribe(&one).await.unwrap();
        hub.broadcast(&two, end_event("conv-2", "alice"))
            .await
            .unwrap();

        assert!(subscriber.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_detaches_exactly_once() {
        let hub = LocalSignalingHub::new();
        let conversation = ConversationId::new("conv-1");

        let first = hub.subscribe(&conversation).await.unwrap();
        let second = hub.subscribe(&conversation).await.unwrap();
        assert_eq!(hub.subscriber_count(&conversation), 2);

        first.unsubscribe();
        assert_eq!(hub.subscriber_count(&conversation), 1);

        drop(second);
        assert_eq!(hub.subscriber_count(&conversation), 0);

        // Broadcasting into the now-empty conversation is still fine
        hub.broadcast(&conversation, end_event("conv-1", "alice"))
            .await
            .unwrap();
    }
}
