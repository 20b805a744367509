//! Call session state machine
//!
//! A [`CallSession`] drives one call attempt between two identified parties
//! from `Idle` through to `Ended`, keeping the local capture device, the
//! peer link, and the remote party mutually consistent. Everything arriving
//! from the outside world (signaling events, link callbacks) funnels
//! through two dispatchers, [`CallSession::handle_signal`] and
//! [`CallSession::handle_link_event`], so the whole machine runs on one
//! logical task and is testable with fake collaborators.

use crate::config::CallConfig;
use crate::event::{CallEvent, EventStream};
use peercall_core::{
    CallError, ConversationId, LinkEvent, LinkState, MediaKind, PartyId, PeerConnector, PeerLink,
    SessionDescription,
};
use peercall_media::{
    CaptureConstraints, LocalCapture, MediaDevices, RemoteAudioSink, RemoteVideoSink,
};
use peercall_signaling::{RelayClient, SignalEvent, SignalingChannel, Subscription};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Current state of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// No call in progress
    #[default]
    Idle,
    /// Negotiating: offer sent or answer sent, media path not yet up
    Connecting,
    /// A remote offer is ringing locally, waiting for accept
    Incoming,
    /// Media path established
    Connected,
    /// Call over; terminal for this session
    Ended,
}

impl CallState {
    /// Whether the session has reached its terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Whether a call attempt is in progress
    pub fn is_in_call(&self) -> bool {
        matches!(self, Self::Connecting | Self::Incoming | Self::Connected)
    }
}

/// Fluent builder for a call session
pub struct CallSessionBuilder {
    conversation_id: Option<ConversationId>,
    local_party: Option<PartyId>,
    remote_party: Option<PartyId>,
    channel: Option<Arc<dyn SignalingChannel>>,
    devices: Option<Arc<dyn MediaDevices>>,
    connector: Option<Arc<dyn PeerConnector>>,
    config: CallConfig,
}

impl CallSessionBuilder {
    /// Start building a session
    pub fn new() -> Self {
        Self {
            conversation_id: None,
            local_party: None,
            remote_party: None,
            channel: None,
            devices: None,
            connector: None,
            config: CallConfig::default(),
        }
    }

    /// Set the conversation scoping the signaling channel (required)
    pub fn conversation(mut self, id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Set the local participant (required)
    pub fn local_party(mut self, id: impl Into<PartyId>) -> Self {
        self.local_party = Some(id.into());
        self
    }

    /// Set the remote participant (required)
    pub fn remote_party(mut self, id: impl Into<PartyId>) -> Self {
        self.remote_party = Some(id.into());
        self
    }

    /// Set the signaling channel.
    ///
    /// Required unless the configuration carries a `signaling_url`, in
    /// which case a relay client is connected instead.
    pub fn channel(mut self, channel: Arc<dyn SignalingChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Set the capture device backend (required)
    pub fn devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Set the peer connector (required)
    pub fn connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Override the default call configuration
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to the conversation and return the idle session plus its
    /// event stream
    pub async fn connect(self) -> Result<(CallSession, EventStream), CallError> {
        let conversation_id = self
            .conversation_id
            .ok_or_else(|| CallError::MissingConfiguration {
                field: "conversation_id".to_string(),
            })?;
        let local_party = self
            .local_party
            .ok_or_else(|| CallError::MissingConfiguration {
                field: "local_party".to_string(),
            })?;
        let remote_party = self
            .remote_party
            .ok_or_else(|| CallError::MissingConfiguration {
                field: "remote_party".to_string(),
            })?;
        let channel: Arc<dyn SignalingChannel> = match self.channel {
            Some(channel) => channel,
            // No explicit channel: fall back to the configured relay URL
            None => match self.config.signaling_url.as_deref() {
                Some(url) => {
                    let client = RelayClient::connect(url).await.map_err(|e| {
                        CallError::SignalingDelivery {
                            reason: format!("relay connect failed: {}", e),
                        }
                    })?;
                    Arc::new(client)
                }
                None => {
                    return Err(CallError::MissingConfiguration {
                        field: "channel".to_string(),
                    })
                }
            },
        };
        let devices = self.devices.ok_or_else(|| CallError::MissingConfiguration {
            field: "devices".to_string(),
        })?;
        let connector = self
            .connector
            .ok_or_else(|| CallError::MissingConfiguration {
                field: "connector".to_string(),
            })?;

        let subscription = channel.subscribe(&conversation_id).await.map_err(|e| {
            CallError::SignalingDelivery {
                reason: format!("subscribe failed: {}", e),
            }
        })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mic_enabled = self.config.mic_enabled;
        let camera_enabled = self.config.camera_enabled;
        let speaker_enabled = self.config.speaker_enabled;

        let session = CallSession {
            conversation_id,
            local_party,
            remote_party,
            config: self.config,
            channel,
            devices,
            connector,
            subscription: Some(subscription),
            state: CallState::Idle,
            capture: None,
            link: None,
            link_events: None,
            pending_offer: None,
            pending_candidates: VecDeque::new(),
            remote_description_set: false,
            mic_enabled,
            camera_enabled,
            speaker_enabled,
            remote_audio: None,
            remote_video: None,
            events_tx,
            torn_down: false,
        };

        Ok((session, EventStream::new(events_rx)))
    }
}

impl Default for CallSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One call attempt between two identified parties
pub struct CallSession {
    conversation_id: ConversationId,
    local_party: PartyId,
    remote_party: PartyId,
    config: CallConfig,
    channel: Arc<dyn SignalingChannel>,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnector>,
    subscription: Option<Subscription>,
    state: CallState,
    capture: Option<LocalCapture>,
    link: Option<Box<dyn PeerLink>>,
    link_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    pending_offer: Option<SessionDescription>,
    pending_candidates: VecDeque<peercall_core::IceCandidate>,
    remote_description_set: bool,
    mic_enabled: bool,
    camera_enabled: bool,
    speaker_enabled: bool,
    remote_audio: Option<RemoteAudioSink>,
    remote_video: Option<RemoteVideoSink>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    torn_down: bool,
}

impl CallSession {
    /// Start building a session
    pub fn builder() -> CallSessionBuilder {
        CallSessionBuilder::new()
    }

    /// Current session state
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Conversation this session signals through
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The local participant
    pub fn local_party(&self) -> &PartyId {
        &self.local_party
    }

    /// The remote participant
    pub fn remote_party(&self) -> &PartyId {
        &self.remote_party
    }

    /// Whether the microphone toggle is on
    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    /// Whether the camera toggle is on
    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    /// Whether remote audio is audible locally
    pub fn speaker_enabled(&self) -> bool {
        self.speaker_enabled
    }

    /// The local capture, once acquired (for UI binding)
    pub fn capture(&self) -> Option<&LocalCapture> {
        self.capture.as_ref()
    }

    /// Playback sink for the remote party's audio, once their track arrived
    pub fn remote_audio(&self) -> Option<&RemoteAudioSink> {
        self.remote_audio.as_ref()
    }

    /// Rendering sink for the remote party's video, once their track arrived
    pub fn remote_video(&self) -> Option<&RemoteVideoSink> {
        self.remote_video.as_ref()
    }

    /// Candidates buffered while no peer link could accept them yet
    pub fn buffered_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Place an outgoing call.
    ///
    /// Only acts in `Idle`; invocations in any other state (including a
    /// second click while device acquisition is still pending) are ignored.
    /// On device failure the session rolls back to `Idle` and nothing is
    /// signaled.
    pub async fn start_call(&mut self) -> Result<(), CallError> {
        if self.state != CallState::Idle {
            tracing::debug!(state = ?self.state, "start_call ignored outside Idle");
            return Ok(());
        }

        // Leave Idle before the first await so a second trigger is ignored
        self.set_state(CallState::Connecting);

        match self.begin_outbound().await {
            Ok(()) => Ok(()),
            Err(err @ CallError::DeviceAccess { .. }) => {
                self.set_state(CallState::Idle);
                self.emit(CallEvent::CallFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
            Err(err) => {
                self.teardown(false).await;
                self.emit(CallEvent::CallFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn begin_outbound(&mut self) -> Result<(), CallError> {
        let capture = self.acquire_capture().await?;
        self.capture = Some(capture);

        let mut link = self.connector.connect(&self.config.ice_servers)?;
        self.link_events = link.take_events();

        let offer = link.create_offer().await?;
        link.set_local_description(offer.clone()).await?;
        self.link = Some(link);

        let event = SignalEvent::Offer {
            offer,
            from_party_id: self.local_party.clone(),
            to_party_id: self.remote_party.clone(),
            conversation_id: self.conversation_id.clone(),
        };
        self.broadcast(event).await;
        tracing::info!(to = %self.remote_party, "call offer sent");
        Ok(())
    }

    /// Accept the buffered incoming offer.
    ///
    /// Only acts in `Incoming`. On device failure the session rolls back to
    /// `Incoming` with the offer retained so the user can retry.
    pub async fn accept_incoming_call(&mut self) -> Result<(), CallError> {
        if self.state != CallState::Incoming {
            tracing::debug!(state = ?self.state, "accept_incoming_call ignored outside Incoming");
            return Ok(());
        }
        let offer = match self.pending_offer.clone() {
            Some(offer) => offer,
            None => {
                return Err(CallError::InvalidState {
                    expected: "buffered incoming offer".to_string(),
                    actual: "none".to_string(),
                })
            }
        };

        self.set_state(CallState::Connecting);

        match self.begin_inbound(offer).await {
            Ok(()) => {
                self.pending_offer = None;
                Ok(())
            }
            Err(err @ CallError::DeviceAccess { .. }) => {
                // Offer stays buffered so accepting can be retried
                self.set_state(CallState::Incoming);
                self.emit(CallEvent::CallFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
            Err(err) => {
                self.teardown(false).await;
                self.emit(CallEvent::CallFailed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn begin_inbound(&mut self, offer: SessionDescription) -> Result<(), CallError> {
        let capture = self.acquire_capture().await?;
        self.capture = Some(capture);

        let mut link = self.connector.connect(&self.config.ice_servers)?;
        self.link_events = link.take_events();

        link.set_remote_description(offer).await?;
        self.remote_description_set = true;

        // Replay candidates that arrived before the link existed, in
        // arrival order; individual rejects must not kill the session
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(err) = link.add_ice_candidate(candidate).await {
                tracing::warn!(error = %err, "buffered candidate rejected");
            }
        }

        let answer = link.create_answer().await?;
        link.set_local_description(answer.clone()).await?;
        self.link = Some(link);

        let event = SignalEvent::Answer {
            answer,
            from_party_id: self.local_party.clone(),
            to_party_id: self.remote_party.clone(),
            conversation_id: self.conversation_id.clone(),
        };
        self.broadcast(event).await;
        tracing::info!(to = %self.remote_party, "call answer sent");
        Ok(())
    }

    /// Hang up. Valid in any state; a no-op in `Idle` and after the call
    /// has already ended.
    pub async fn end_call(&mut self) {
        if matches!(self.state, CallState::Idle | CallState::Ended) {
            return;
        }
        self.teardown(true).await;
        self.emit(CallEvent::CallEnded { by_remote: false });
    }

    /// Toggle the microphone. No-op unless a capture with an audio track
    /// exists; never renegotiates.
    pub fn toggle_mic(&mut self) {
        let Some(capture) = &self.capture else { return };
        let Some(track) = capture.audio_track() else {
            return;
        };
        self.mic_enabled = !self.mic_enabled;
        track.set_enabled(self.mic_enabled);
        tracing::debug!(enabled = self.mic_enabled, "microphone toggled");
    }

    /// Toggle the camera. No-op unless a capture with a video track exists;
    /// never renegotiates.
    pub fn toggle_camera(&mut self) {
        let Some(capture) = &self.capture else { return };
        let Some(track) = capture.video_track() else {
            return;
        };
        self.camera_enabled = !self.camera_enabled;
        track.set_enabled(self.camera_enabled);
        tracing::debug!(enabled = self.camera_enabled, "camera toggled");
    }

    /// Toggle local playback of remote audio.
    ///
    /// `speaker_enabled == true` means remote audio is audible. Only the
    /// local sink's muted flag changes; nothing is signaled and the link is
    /// untouched.
    pub fn toggle_speaker(&mut self) {
        self.speaker_enabled = !self.speaker_enabled;
        if let Some(sink) = &self.remote_audio {
            sink.set_muted(!self.speaker_enabled);
        }
        tracing::debug!(enabled = self.speaker_enabled, "speaker toggled");
    }

    /// Dispatch one inbound signaling event.
    ///
    /// Self-echoes, wrong-conversation and wrong-addressee events, and
    /// anything after teardown are silently discarded. Duplicate events for
    /// an already-transitioned state are no-ops.
    pub async fn handle_signal(&mut self, event: SignalEvent) {
        if event.from_party_id() == &self.local_party {
            tracing::trace!(kind = event.kind(), "dropping self echo");
            return;
        }
        if event.conversation_id() != &self.conversation_id {
            tracing::trace!(kind = event.kind(), "dropping event for other conversation");
            return;
        }
        if !event.is_addressed_to(&self.local_party) {
            return;
        }
        if event.from_party_id() != &self.remote_party {
            tracing::debug!(
                from = %event.from_party_id(),
                "dropping event from untracked party"
            );
            return;
        }
        if self.torn_down {
            tracing::trace!(kind = event.kind(), "dropping stale event after teardown");
            return;
        }

        match event {
            SignalEvent::Offer { offer, .. } => {
                if self.state != CallState::Idle {
                    tracing::debug!(state = ?self.state, "duplicate or conflicting offer ignored");
                    return;
                }
                self.pending_offer = Some(offer);
                self.set_state(CallState::Incoming);
                self.emit(CallEvent::IncomingCall {
                    from: self.remote_party.clone(),
                });
                tracing::info!(from = %self.remote_party, "incoming call");
            }
            SignalEvent::Answer { answer, .. } => {
                if self.state != CallState::Connecting {
                    tracing::debug!(state = ?self.state, "answer ignored");
                    return;
                }
                let Some(link) = self.link.as_mut() else {
                    tracing::debug!("answer arrived with no peer link");
                    return;
                };
                if self.remote_description_set {
                    // At-least-once delivery: the answer was already applied
                    return;
                }
                match link.set_remote_description(answer).await {
                    Ok(()) => {
                        self.remote_description_set = true;
                        self.flush_pending_candidates().await;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "applying remote answer failed");
                        self.teardown(false).await;
                        self.emit(CallEvent::CallFailed {
                            error: err.to_string(),
                        });
                    }
                }
            }
            SignalEvent::IceCandidate { candidate, .. } => {
                if self.remote_description_set && self.link.is_some() {
                    if let Some(link) = self.link.as_mut() {
                        if let Err(err) = link.add_ice_candidate(candidate).await {
                            tracing::warn!(error = %err, "remote candidate rejected");
                        }
                    }
                } else {
                    // Candidates may beat the offer/answer; buffer and
                    // replay once descriptions are in place
                    self.pending_candidates.push_back(candidate);
                }
            }
            SignalEvent::End { .. } => {
                if matches!(self.state, CallState::Idle | CallState::Ended) {
                    return;
                }
                tracing::info!(from = %self.remote_party, "remote party ended the call");
                self.teardown(false).await;
                self.emit(CallEvent::CallEnded { by_remote: true });
            }
        }
    }

    /// Dispatch one event from the peer link
    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        if self.torn_down {
            return;
        }
        match event {
            LinkEvent::StateChanged(LinkState::Connected) => {
                if self.state == CallState::Connecting {
                    self.set_state(CallState::Connected);
                    tracing::info!(with = %self.remote_party, "call connected");
                }
            }
            LinkEvent::StateChanged(LinkState::Failed)
            | LinkEvent::StateChanged(LinkState::Disconnected) => {
                if self.state.is_in_call() {
                    tracing::warn!("peer link lost");
                    self.teardown(false).await;
                    self.emit(CallEvent::CallFailed {
                        error: "connection lost".to_string(),
                    });
                }
            }
            LinkEvent::StateChanged(state) => {
                tracing::trace!(?state, "link state changed");
            }
            LinkEvent::IceCandidate(candidate) => {
                let event = SignalEvent::IceCandidate {
                    candidate,
                    from_party_id: self.local_party.clone(),
                    conversation_id: self.conversation_id.clone(),
                };
                self.broadcast(event).await;
            }
            LinkEvent::RemoteTrack { track_id, kind } => {
                match kind {
                    MediaKind::Audio => {
                        let sink = RemoteAudioSink::new(track_id.clone());
                        sink.set_muted(!self.speaker_enabled);
                        self.remote_audio = Some(sink);
                    }
                    MediaKind::Video => {
                        self.remote_video = Some(RemoteVideoSink::new(track_id.clone()));
                    }
                }
                self.emit(CallEvent::RemoteTrack { track_id, kind });
            }
        }
    }

    /// Process every already-delivered signaling and link event.
    ///
    /// Returns the number of events handled. Deterministic driver for
    /// callers that own the scheduling (tests, custom event loops).
    pub async fn pump(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let mut progressed = false;
            while let Some(event) = self.subscription.as_mut().and_then(|s| s.try_recv()) {
                self.handle_signal(event).await;
                processed += 1;
                progressed = true;
            }
            while let Some(event) = self.link_events.as_mut().and_then(|rx| rx.try_recv().ok()) {
                self.handle_link_event(event).await;
                processed += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        processed
    }

    /// Drive the session until it ends or the signaling channel closes.
    ///
    /// Pumps inbound signaling and link events through the dispatchers;
    /// local operations must happen before or after, not concurrently.
    pub async fn run(&mut self) {
        while !self.torn_down && self.state != CallState::Ended {
            let Some(mut subscription) = self.subscription.take() else {
                break;
            };
            match self.link_events.take() {
                Some(mut link_rx) => {
                    tokio::select! {
                        signal = subscription.recv() => {
                            self.subscription = Some(subscription);
                            self.link_events = Some(link_rx);
                            match signal {
                                Some(event) => self.handle_signal(event).await,
                                None => {
                                    self.handle_channel_closed().await;
                                    break;
                                }
                            }
                        }
                        link_event = link_rx.recv() => {
                            self.subscription = Some(subscription);
                            match link_event {
                                Some(event) => {
                                    self.link_events = Some(link_rx);
                                    self.handle_link_event(event).await;
                                }
                                None => {
                                    // Link gone; keep serving signaling
                                }
                            }
                        }
                    }
                }
                None => {
                    let signal = subscription.recv().await;
                    self.subscription = Some(subscription);
                    match signal {
                        Some(event) => self.handle_signal(event).await,
                        None => {
                            self.handle_channel_closed().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Full teardown: release media, close the link, drop the channel
    /// subscription. Idempotent; safe mid-negotiation.
    pub async fn close(&mut self) {
        if self.state.is_in_call() {
            self.teardown(true).await;
        } else {
            self.release_resources();
            self.set_state(CallState::Ended);
            self.torn_down = true;
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    async fn acquire_capture(&mut self) -> Result<LocalCapture, CallError> {
        if self.capture.is_some() {
            return Err(CallError::InvalidState {
                expected: "no open capture".to_string(),
                actual: "capture already open".to_string(),
            });
        }
        let constraints = CaptureConstraints {
            audio: self.mic_enabled,
            video: self.camera_enabled,
        };
        self.devices
            .acquire(constraints)
            .await
            .map_err(|err| CallError::DeviceAccess {
                reason: err.to_string(),
            })
    }

    async fn broadcast(&self, event: SignalEvent) {
        // Fire and forget: a stalled remote shows up as a stuck
        // "Connecting" state, never as a local failure
        if let Err(err) = self.channel.broadcast(&self.conversation_id, event).await {
            tracing::warn!(error = %err, "signaling broadcast failed");
        }
    }

    async fn handle_channel_closed(&mut self) {
        if !self.state.is_in_call() {
            return;
        }
        tracing::warn!("signaling channel closed mid-call");
        self.teardown(false).await;
        self.emit(CallEvent::CallFailed {
            error: CallError::ChannelClosed.to_string(),
        });
    }

    async fn flush_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(err) = link.add_ice_candidate(candidate).await {
                tracing::warn!(error = %err, "buffered candidate rejected");
            }
        }
    }

    async fn teardown(&mut self, notify_remote: bool) {
        if self.torn_down {
            return;
        }
        self.release_resources();
        if notify_remote {
            let event = SignalEvent::End {
                from_party_id: self.local_party.clone(),
                to_party_id: self.remote_party.clone(),
                conversation_id: self.conversation_id.clone(),
            };
            self.broadcast(event).await;
        }
        self.set_state(CallState::Ended);
        self.torn_down = true;
    }

    fn release_resources(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.link_events = None;
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.pending_offer = None;
        self.pending_candidates.clear();
        self.remote_description_set = false;
        self.remote_audio = None;
        self.remote_video = None;
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "call state changed");
            self.state = state;
            self.emit(CallEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: CallEvent) {
        // The UI may have dropped its stream already
        let _ = self.events_tx.send(event);
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        // Backstop: the subscription detaches on drop, media and link are
        // released here; signaling the remote needs an async context and is
        // the caller's job via end_call/close
        self.release_resources();
    }
}
