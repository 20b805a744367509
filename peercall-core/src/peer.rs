//! Peer connection abstraction
//!
//! A [`PeerLink`] wraps one peer-to-peer media connection attempt: it holds
//! the local and remote session descriptions, accumulates remote ICE
//! candidates, and reports connection-state changes through an event
//! receiver. Links are created fresh for every call attempt and never
//! reused.
//!
//! The [`LoopbackLink`] implementation simulates negotiation in-process so
//! the session state machine can be exercised without a browser or network
//! stack, following the same pattern as shipping a mock capture backend.

use crate::error::CallError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which half of the offer/answer exchange a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Description created by the calling side
    Offer,
    /// Description created by the answering side
    Answer,
}

/// A session description blob exchanged during offer/answer negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP payload
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One piece of network-reachability information contributed by a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

impl IceCandidate {
    /// Create a candidate carrying only the attribute line
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// STUN/TURN server entry handed to the connection primitive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (`stun:` or `turn:` schemes)
    pub urls: Vec<String>,
    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Create an unauthenticated STUN entry
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Connection state reported by a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no descriptions applied yet
    New,
    /// Negotiation in progress
    Connecting,
    /// Media path established
    Connected,
    /// Media path lost after being established
    Disconnected,
    /// Negotiation or transport failed
    Failed,
    /// Closed locally; terminal
    Closed,
}

/// Kind of a media track or sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// Events emitted by a peer link while negotiating and connected
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The connection state changed
    StateChanged(LinkState),
    /// A locally gathered candidate is ready to be signaled to the peer.
    ///
    /// Links only emit candidates after a local description has been set.
    IceCandidate(IceCandidate),
    /// A remote media track was added to the connection
    RemoteTrack {
        /// Identifier of the remote track
        track_id: String,
        /// Audio or video
        kind: MediaKind,
    },
}

/// One peer-to-peer media connection attempt.
///
/// Implementations are not reused: a new call creates a new link. `close`
/// must be idempotent.
#[async_trait::async_trait]
pub trait PeerLink: Send {
    /// Create the local offer description
    async fn create_offer(&mut self) -> Result<SessionDescription, CallError>;

    /// Create the local answer description (remote offer must be set first)
    async fn create_answer(&mut self) -> Result<SessionDescription, CallError>;

    /// Apply the local description
    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError>;

    /// Apply the description received from the remote party
    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError>;

    /// Add a candidate received from the remote party
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), CallError>;

    /// Current connection state
    fn state(&self) -> LinkState;

    /// Take the event receiver for this link.
    ///
    /// Yields `Some` exactly once; the link keeps the sending half alive
    /// until it is dropped.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>>;

    /// Close the connection. Safe to call more than once.
    fn close(&mut self);
}

/// Factory producing a fresh [`PeerLink`] per call attempt
pub trait PeerConnector: Send + Sync {
    /// Create a new, unconnected link
    fn connect(&self, ice_servers: &[IceServerConfig]) -> Result<Box<dyn PeerLink>, CallError>;
}

/// In-process [`PeerConnector`] for tests and demos.
///
/// Links it produces complete negotiation locally: they emit one synthetic
/// host candidate after the local description is set and report `Connected`
/// once both descriptions and at least one remote candidate are in place.
#[derive(Debug, Default)]
pub struct LoopbackConnector {
    links_created: AtomicUsize,
    candidate_log: Arc<Mutex<Vec<IceCandidate>>>,
}

impl LoopbackConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links this connector has produced
    pub fn links_created(&self) -> usize {
        self.links_created.load(Ordering::SeqCst)
    }

    /// Remote candidates applied to links from this connector, in the order
    /// they were added
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.candidate_log.lock().clone()
    }
}

impl PeerConnector for LoopbackConnector {
    fn connect(&self, _ice_servers: &[IceServerConfig]) -> Result<Box<dyn PeerLink>, CallError> {
        self.links_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackLink::with_candidate_log(Arc::clone(
            &self.candidate_log,
        ))))
    }
}

/// In-process peer link produced by [`LoopbackConnector`]
pub struct LoopbackLink {
    state: LinkState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_candidate_count: usize,
    candidate_log: Option<Arc<Mutex<Vec<IceCandidate>>>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl LoopbackLink {
    /// Create a standalone loopback link
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: LinkState::New,
            local_description: None,
            remote_description: None,
            remote_candidate_count: 0,
            candidate_log: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    fn with_candidate_log(log: Arc<Mutex<Vec<IceCandidate>>>) -> Self {
        let mut link = Self::new();
        link.candidate_log = Some(log);
        link
    }

    fn emit(&self, event: LinkEvent) {
        // Receiver may already be gone during teardown
        let _ = self.events_tx.send(event);
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "loopback link state changed");
            self.state = state;
            self.emit(LinkEvent::StateChanged(state));
        }
    }

    fn maybe_connect(&mut self) {
        if self.state == LinkState::Connected || self.state == LinkState::Closed {
            return;
        }
        if self.local_description.is_some()
            && self.remote_description.is_some()
            && self.remote_candidate_count > 0
        {
            self.set_state(LinkState::Connected);
            self.emit(LinkEvent::RemoteTrack {
                track_id: "loopback-audio".to_string(),
                kind: MediaKind::Audio,
            });
            self.emit(LinkEvent::RemoteTrack {
                track_id: "loopback-video".to_string(),
                kind: MediaKind::Video,
            });
        }
    }

    fn ensure_open(&self) -> Result<(), CallError> {
        if self.state == LinkState::Closed {
            return Err(CallError::Negotiation {
                reason: "link is closed".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PeerLink for LoopbackLink {
    async fn create_offer(&mut self) -> Result<SessionDescription, CallError> {
        self.ensure_open()?;
        Ok(SessionDescription::offer("v=0\r\ns=loopback offer\r\n"))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, CallError> {
        self.ensure_open()?;
        if self.remote_description.is_none() {
            return Err(CallError::Negotiation {
                reason: "cannot create answer before remote offer is set".to_string(),
            });
        }
        Ok(SessionDescription::answer("v=0\r\ns=loopback answer\r\n"))
    }

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        self.ensure_open()?;
        self.local_description = Some(description);
        if self.state == LinkState::New {
            self.set_state(LinkState::Connecting);
        }
        // Candidate gathering starts once a local description exists
        self.emit(LinkEvent::IceCandidate(IceCandidate::new(
            "candidate:1 1 udp 2122260223 127.0.0.1 54400 typ host",
        )));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        self.ensure_open()?;
        if let Some(local) = &self.local_description {
            if local.kind == description.kind {
                return Err(CallError::Negotiation {
                    reason: format!("local and remote descriptions are both {:?}", local.kind),
                });
            }
        }
        self.remote_description = Some(description);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), CallError> {
        self.ensure_open()?;
        self.remote_candidate_count += 1;
        if let Some(log) = &self.candidate_log {
            log.lock().push(candidate);
        }
        self.maybe_connect();
        Ok(())
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events_rx.take()
    }

    fn close(&mut self) {
        if self.state != LinkState::Closed {
            self.state = LinkState::Closed;
            self.emit(LinkEvent::StateChanged(LinkState::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn candidates_are_emitted_only_after_local_description() {
        let mut link = LoopbackLink::new();
        let mut events = link.take_events().unwrap();

        let offer = link.create_offer().await.unwrap();
        assert!(drain(&mut events).is_empty());

        link.set_local_description(offer).await.unwrap();
        let emitted = drain(&mut events);
        assert!(emitted
            .iter()
            .any(|e| matches!(e, LinkEvent::IceCandidate(_))));
    }

    #[tokio::test]
    async fn link_connects_after_descriptions_and_candidate() {
        let mut link = LoopbackLink::new();
        let offer = link.create_offer().await.unwrap();
        link.set_local_description(offer).await.unwrap();
        link.set_remote_description(SessionDescription::answer("v=0"))
            .await
            .unwrap();
        assert_eq!(link.state(), LinkState::Connecting);

        link.add_ice_candidate(IceCandidate::new("candidate:remote"))
            .await
            .unwrap();
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn mismatched_description_kinds_are_rejected() {
        let mut link = LoopbackLink::new();
        let offer = link.create_offer().await.unwrap();
        link.set_local_description(offer).await.unwrap();
        let result = link
            .set_remote_description(SessionDescription::offer("v=0"))
            .await;
        assert!(matches!(result, Err(CallError::Negotiation { .. })));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut link = LoopbackLink::new();
        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert!(link.create_offer().await.is_err());
    }

    #[tokio::test]
    async fn connector_counts_links_and_logs_candidates() {
        let connector = Arc::new(LoopbackConnector::new());
        let mut link = connector.connect(&[]).unwrap();
        assert_eq!(connector.links_created(), 1);

        link.add_ice_candidate(IceCandidate::new("candidate:a"))
            .await
            .unwrap();
        link.add_ice_candidate(IceCandidate::new("candidate:b"))
            .await
            .unwrap();
        let logged = connector.remote_candidates();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].candidate, "candidate:a");
        assert_eq!(logged[1].candidate, "candidate:b");
    }
}
