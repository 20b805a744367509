//! WebSocket relay for conversation-scoped signaling
//!
//! The relay carries `SignalEvent` frames between processes. Clients attach
//! to a conversation and every event published to that conversation is
//! fanned out to all attached connections, the sender included, matching
//! [`LocalSignalingHub`](crate::channel::LocalSignalingHub) semantics.

use crate::channel::{SignalingChannel, Subscription};
use crate::error::SignalingError;
use crate::protocol::SignalEvent;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use peercall_core::ConversationId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use uuid::Uuid;

/// Subscription management frames exchanged with the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// Start receiving events for a conversation
    #[serde(rename_all = "camelCase")]
    Attach {
        /// Conversation to attach to
        conversation_id: ConversationId,
    },
    /// Stop receiving events for a conversation
    #[serde(rename_all = "camelCase")]
    Detach {
        /// Conversation to detach from
        conversation_id: ConversationId,
    },
}

/// Any frame a client may send to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    /// Subscription management
    Control(ControlFrame),
    /// A signaling event to fan out
    Signal(SignalEvent),
}

#[derive(Debug)]
struct Conversation {
    members: Vec<Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
struct RelayState {
    connections: DashMap<Uuid, mpsc::UnboundedSender<Message>>,
    conversations: DashMap<ConversationId, Conversation>,
}

/// Signaling relay server
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Bind the relay to an address
    pub async fn bind(addr: SocketAddr) -> Result<Self, SignalingError> {
        let listener =
            TcpListener::bind(addr)
                .await
                .map_err(|e| SignalingError::ConnectionFailed {
                    reason: format!("failed to bind {}: {}", addr, e),
                })?;
        Ok(Self {
            listener,
            state: Arc::new(RelayState::default()),
        })
    }

    /// Address the relay is listening on
    pub fn local_addr(&self) -> Result<SocketAddr, SignalingError> {
        self.listener
            .local_addr()
            .map_err(|e| SignalingError::ConnectionFailed {
                reason: e.to_string(),
            })
    }

    /// Accept and serve connections until the task is dropped
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("signaling relay listening on {}", addr),
            Err(_) => tracing::info!("signaling relay listening"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("new connection from {}", addr);
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        handle_connection(state, stream).await;
                    });
                }
                Err(e) => {
                    tracing::error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(state: Arc<RelayState>, stream: TcpStream) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("websocket handshake failed: {}", e);
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    tracing::debug!("websocket connection established: {}", connection_id);

    let (mut sink, mut source) = ws_stream.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    state.connections.insert(connection_id, outbound);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Control(ControlFrame::Attach { conversation_id })) => {
                    attach(&state, connection_id, conversation_id);
                }
                Ok(ClientFrame::Control(ControlFrame::Detach { conversation_id })) => {
                    detach(&state, connection_id, &conversation_id);
                }
                Ok(ClientFrame::Signal(event)) => {
                    fan_out(&state, &event);
                }
                Err(e) => {
                    tracing::warn!("invalid frame on connection {}: {}", connection_id, e);
                }
            },
            Ok(Message::Close(_)) => {
                tracing::debug!("connection {} closed", connection_id);
                break;
            }
            Ok(_) => {
                // Binary, ping and pong frames are ignored
            }
            Err(e) => {
                tracing::error!("websocket error on connection {}: {}", connection_id, e);
                break;
            }
        }
    }

    cleanup(&state, connection_id);
    writer.abort();
}

fn attach(state: &RelayState, connection_id: Uuid, conversation_id: ConversationId) {
    let mut conversation = state
        .conversations
        .entry(conversation_id.clone())
        .or_insert_with(|| Conversation {
            members: Vec::new(),
            created_at: chrono::Utc::now(),
        });
    if !conversation.members.contains(&connection_id) {
        conversation.members.push(connection_id);
    }
    tracing::debug!(
        %conversation_id,
        connection = %connection_id,
        since = %conversation.created_at,
        "connection attached to conversation"
    );
}

fn detach(state: &RelayState, connection_id: Uuid, conversation_id: &ConversationId) {
    if let Some(mut conversation) = state.conversations.get_mut(conversation_id) {
        conversation.members.retain(|m| *m != connection_id);
    }
    state
        .conversations
        .remove_if(conversation_id, |_, c| c.members.is_empty());
}

fn fan_out(state: &RelayState, event: &SignalEvent) {
    let Some(conversation) = state.conversations.get(event.conversation_id()) else {
        tracing::debug!(
            conversation_id = %event.conversation_id(),
            kind = event.kind(),
            "event for conversation with no attached connections"
        );
        return;
    };

    let text = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("failed to serialize event: {}", e);
            return;
        }
    };

    for member in &conversation.members {
        if let Some(connection) = state.connections.get(member) {
            if connection.send(Message::Text(text.clone())).is_err() {
                tracing::debug!("connection {} is gone, skipping", member);
            }
        }
    }
}

fn cleanup(state: &RelayState, connection_id: Uuid) {
    state.connections.remove(&connection_id);
    state.conversations.retain(|_, conversation| {
        conversation.members.retain(|m| *m != connection_id);
        !conversation.members.is_empty()
    });
    tracing::debug!("connection {} cleaned up", connection_id);
}

struct ClientSubscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<SignalEvent>,
}

struct ClientInner {
    outbound: mpsc::UnboundedSender<Message>,
    topics: DashMap<ConversationId, Vec<ClientSubscriber>>,
}

/// [`SignalingChannel`] backed by a WebSocket connection to a [`RelayServer`]
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

impl RelayClient {
    /// Connect to a relay at the given `ws://` URL
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let (ws_stream, _) =
            connect_async(url)
                .await
                .map_err(|e| SignalingError::ConnectionFailed {
                    reason: format!("failed to connect {}: {}", url, e),
                })?;

        let (mut sink, mut source) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let inner = Arc::new(ClientInner {
            outbound,
            topics: DashMap::new(),
        });

        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalEvent>(&text) {
                        Ok(event) => {
                            if let Some(mut subscribers) =
                                reader_inner.topics.get_mut(event.conversation_id())
                            {
                                subscribers.retain(|s| s.sender.send(event.clone()).is_ok());
                            }
                        }
                        Err(e) => {
                            tracing::warn!("invalid event from relay: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("relay connection error: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("relay connection closed");
        });

        Ok(Self { inner })
    }

    fn send_frame(&self, frame: &ClientFrame) -> Result<(), SignalingError> {
        let text =
            serde_json::to_string(frame).map_err(|e| SignalingError::InvalidMessage {
                message: e.to_string(),
            })?;
        self.inner
            .outbound
            .send(Message::Text(text))
            .map_err(|_| SignalingError::Delivery {
                reason: "relay connection closed".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl SignalingChannel for RelayClient {
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Subscription, SignalingError> {
        self.send_frame(&ClientFrame::Control(ControlFrame::Attach {
            conversation_id: conversation_id.clone(),
        }))
        .map_err(|e| SignalingError::Subscribe {
            conversation_id: conversation_id.to_string(),
            reason: e.to_string(),
        })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner
            .topics
            .entry(conversation_id.clone())
            .or_default()
            .push(ClientSubscriber { id, sender });

        let inner = Arc::clone(&self.inner);
        let conversation = conversation_id.clone();
        Ok(Subscription::new(receiver, move || {
            let mut detach_upstream = false;
            if let Some(mut subscribers) = inner.topics.get_mut(&conversation) {
                subscribers.retain(|s| s.id != id);
                detach_upstream = subscribers.is_empty();
            }
            if detach_upstream {
                inner.topics.remove_if(&conversation, |_, s| s.is_empty());
                let frame = ClientFrame::Control(ControlFrame::Detach {
                    conversation_id: conversation.clone(),
                });
                if let Ok(text) = serde_json::to_string(&frame) {
                    // Best effort: the connection may already be gone
                    let _ = inner.outbound.send(Message::Text(text));
                }
            }
        }))
    }

    async fn broadcast(
        &self,
        _conversation_id: &ConversationId,
        event: SignalEvent,
    ) -> Result<(), SignalingError> {
        self.send_frame(&ClientFrame::Signal(event))
    }
}
