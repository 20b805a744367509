//! Events surfaced to the call UI

use crate::session::CallState;
use peercall_core::{MediaKind, PartyId};
use tokio::sync::mpsc;

/// Events a call session emits for the UI to render
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The session state changed
    StateChanged {
        /// New session state
        state: CallState,
    },
    /// An offer arrived; the session is ringing locally
    IncomingCall {
        /// Party that is calling
        from: PartyId,
    },
    /// A remote media track became available for playback
    RemoteTrack {
        /// Identifier of the remote track
        track_id: String,
        /// Audio or video
        kind: MediaKind,
    },
    /// An operation failed; the user may re-initiate the call manually
    CallFailed {
        /// Human-readable failure description
        error: String,
    },
    /// The call ended
    CallEnded {
        /// Whether the remote party hung up
        by_remote: bool,
    },
}

impl CallEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            CallEvent::StateChanged { .. } => "state_changed",
            CallEvent::IncomingCall { .. } => "incoming_call",
            CallEvent::RemoteTrack { .. } => "remote_track",
            CallEvent::CallFailed { .. } => "call_failed",
            CallEvent::CallEnded { .. } => "call_ended",
        }
    }
}

/// Stream of call events for UI consumption
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<CallEvent>,
}

impl EventStream {
    /// Create an event stream from a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<CallEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event; `None` once the session is gone
    pub async fn next(&mut self) -> Option<CallEvent> {
        self.receiver.recv().await
    }

    /// Take the next already-emitted event without waiting
    pub fn try_next(&mut self) -> Option<CallEvent> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_stream_delivers_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = EventStream::new(rx);

        tx.send(CallEvent::StateChanged {
            state: CallState::Connecting,
        })
        .unwrap();
        tx.send(CallEvent::CallEnded { by_remote: false }).unwrap();

        assert_eq!(stream.next().await.unwrap().event_type(), "state_changed");
        assert_eq!(stream.next().await.unwrap().event_type(), "call_ended");
        assert!(stream.try_next().is_none());
    }
}
