//! # PeerCall
//!
//! Peer-to-peer call signaling and media-session lifecycle management.
//!
//! PeerCall drives one audio/video call between two identified parties:
//! offer/answer negotiation over a conversation-scoped signaling channel,
//! ICE candidate exchange with out-of-order buffering, local capture
//! management, and media toggles that never renegotiate.
//!
//! ## Quick Start
//!
//! ```no_run
//! use peercall::{CallSession, LocalSignalingHub, LoopbackConnector, MockDevices};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Arc::new(LocalSignalingHub::new());
//!
//!     let (mut session, mut events) = CallSession::builder()
//!         .conversation("conv-42")
//!         .local_party("alice")
//!         .remote_party("bob")
//!         .channel(hub)
//!         .devices(Arc::new(MockDevices::new()))
//!         .connector(Arc::new(LoopbackConnector::new()))
//!         .connect()
//!         .await?;
//!
//!     session.start_call().await?;
//!
//!     while let Some(event) = events.next().await {
//!         println!("call event: {}", event.event_type());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`CallSession`] owns the call state machine; all inbound signaling and
//!   peer-link events flow through it on one logical task
//! - [`SignalingChannel`] abstracts the transport: [`LocalSignalingHub`]
//!   for in-process fan-out, [`RelayClient`] for a WebSocket relay
//! - [`PeerConnector`] and [`MediaDevices`] abstract the media plane so
//!   sessions run deterministically under test

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod event;
pub mod session;

pub use config::CallConfig;
pub use event::{CallEvent, EventStream};
pub use session::{CallSession, CallSessionBuilder, CallState};

// Core types
pub use peercall_core::{
    CallError, ConversationId, IceCandidate, IceServerConfig, LinkEvent, LinkState,
    LoopbackConnector, MediaKind, PartyId, PeerConnector, PeerLink, SdpKind, SessionDescription,
};

// Media types
pub use peercall_media::{
    AudioTrack, CaptureConstraints, LocalCapture, MediaDevices, MediaError, MockDevices,
    RemoteAudioSink, RemoteVideoSink, VideoTrack,
};

// Signaling types
pub use peercall_signaling::{
    LocalSignalingHub, RelayClient, RelayServer, SignalEvent, SignalingChannel, SignalingError,
    Subscription,
};
