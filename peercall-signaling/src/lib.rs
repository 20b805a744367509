//! # Peercall Signaling
//!
//! Signaling for peer-to-peer calls: the wire protocol ([`SignalEvent`]),
//! the [`SignalingChannel`] adapter sessions publish and subscribe through,
//! an in-process [`LocalSignalingHub`], and a WebSocket relay
//! ([`RelayServer`]/[`RelayClient`]) for crossing process boundaries.
//!
//! The channel contract is deliberately weak: at-least-once delivery, no
//! ordering across parties, and broadcasts may be echoed back to their
//! sender. Session logic is written against exactly that contract.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export main types
pub use channel::{LocalSignalingHub, SignalingChannel, Subscription};
pub use error::SignalingError;
pub use protocol::SignalEvent;
pub use server::{RelayClient, RelayServer};
