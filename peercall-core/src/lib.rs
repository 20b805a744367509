//! # Peercall Core
//!
//! Shared building blocks for the peercall workspace: conversation and party
//! identifiers, the call error taxonomy, and the peer connection abstraction
//! (`PeerLink`) that the session state machine drives.
//!
//! The peer connection itself is a seam: embedders plug in whatever media
//! connection primitive their platform offers. An in-process
//! [`LoopbackConnector`] is provided so sessions can be exercised without a
//! network or device stack.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ids;
pub mod peer;

// Re-export main types
pub use error::CallError;
pub use ids::{ConversationId, PartyId};
pub use peer::{
    IceCandidate, IceServerConfig, LinkEvent, LinkState, LoopbackConnector, LoopbackLink,
    MediaKind, PeerConnector, PeerLink, SdpKind, SessionDescription,
};
