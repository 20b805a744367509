//! Error types for peercall sessions

use thiserror::Error;

/// Main error type for call session operations
#[derive(Error, Debug)]
pub enum CallError {
    /// Camera or microphone permission denied, or hardware unavailable.
    ///
    /// Recoverable: the session rolls back to the state it was in before the
    /// acquisition attempt and no signaling message is sent.
    #[error("Device access failed: {reason}")]
    DeviceAccess {
        /// Reason the capture device could not be acquired
        reason: String,
    },

    /// Setting or creating a session description failed.
    ///
    /// Not retried: the session transitions to `Ended` and tears down any
    /// partially-acquired resources.
    #[error("Negotiation failed: {reason}")]
    Negotiation {
        /// Reason the offer/answer exchange failed
        reason: String,
    },

    /// A signaling broadcast failed at the channel layer.
    ///
    /// Best effort: logged, never retried, never blocks a local state
    /// transition.
    #[error("Signaling delivery failed: {reason}")]
    SignalingDelivery {
        /// Reason reported by the signaling channel
        reason: String,
    },

    /// An operation was invoked in a state that does not permit it
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// The conversation subscription ended while the session was live
    #[error("Signaling channel closed")]
    ChannelClosed,
}
