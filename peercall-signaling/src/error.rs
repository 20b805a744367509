//! Error types for signaling channels

use thiserror::Error;

/// Errors surfaced by signaling channel implementations
#[derive(Error, Debug)]
pub enum SignalingError {
    /// A broadcast could not be delivered to the channel.
    ///
    /// Broadcasts are fire-and-forget; callers log this and move on.
    #[error("Broadcast delivery failed: {reason}")]
    Delivery {
        /// Reason delivery failed
        reason: String,
    },

    /// Subscribing to a conversation channel failed
    #[error("Subscribe failed for conversation {conversation_id}: {reason}")]
    Subscribe {
        /// Conversation that could not be subscribed
        conversation_id: String,
        /// Reason the subscription failed
        reason: String,
    },

    /// An inbound frame could not be parsed
    #[error("Invalid signaling message: {message}")]
    InvalidMessage {
        /// Offending message or parse error
        message: String,
    },

    /// The underlying transport connection failed
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Reason the connection failed
        reason: String,
    },
}
