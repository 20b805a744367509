//! Signaling wire protocol
//!
//! Events travel as tagged JSON over a conversation-scoped channel. Delivery
//! is at-least-once with no ordering guarantee across parties, and the
//! channel may echo a broadcast back to its sender; consumers filter echoes
//! by `fromPartyId`.

use peercall_core::{ConversationId, IceCandidate, PartyId, SessionDescription};
use serde::{Deserialize, Serialize};

/// One ephemeral signaling event; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SignalEvent {
    /// Call offer from the initiating party
    #[serde(rename_all = "camelCase")]
    Offer {
        /// Offer session description
        offer: SessionDescription,
        /// Sending party
        from_party_id: PartyId,
        /// Addressed party
        to_party_id: PartyId,
        /// Conversation the call belongs to
        conversation_id: ConversationId,
    },
    /// Answer from the accepting party
    #[serde(rename_all = "camelCase")]
    Answer {
        /// Answer session description
        answer: SessionDescription,
        /// Sending party
        from_party_id: PartyId,
        /// Addressed party
        to_party_id: PartyId,
        /// Conversation the call belongs to
        conversation_id: ConversationId,
    },
    /// Network candidate contributed by either party.
    ///
    /// Candidates carry no addressee; everyone on the channel except the
    /// sender consumes them.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        /// The candidate payload
        candidate: IceCandidate,
        /// Sending party
        from_party_id: PartyId,
        /// Conversation the call belongs to
        conversation_id: ConversationId,
    },
    /// Hang-up notification
    #[serde(rename_all = "camelCase")]
    End {
        /// Sending party
        from_party_id: PartyId,
        /// Addressed party
        to_party_id: PartyId,
        /// Conversation the call belongs to
        conversation_id: ConversationId,
    },
}

impl SignalEvent {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            SignalEvent::Offer { .. } => "offer",
            SignalEvent::Answer { .. } => "answer",
            SignalEvent::IceCandidate { .. } => "ice-candidate",
            SignalEvent::End { .. } => "end",
        }
    }

    /// Party that sent the event
    pub fn from_party_id(&self) -> &PartyId {
        match self {
            SignalEvent::Offer { from_party_id, .. }
            | SignalEvent::Answer { from_party_id, .. }
            | SignalEvent::IceCandidate { from_party_id, .. }
            | SignalEvent::End { from_party_id, .. } => from_party_id,
        }
    }

    /// Party the event is addressed to, where the kind carries one
    pub fn to_party_id(&self) -> Option<&PartyId> {
        match self {
            SignalEvent::Offer { to_party_id, .. }
            | SignalEvent::Answer { to_party_id, .. }
            | SignalEvent::End { to_party_id, .. } => Some(to_party_id),
            SignalEvent::IceCandidate { .. } => None,
        }
    }

    /// Conversation the event is scoped to
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            SignalEvent::Offer {
                conversation_id, ..
            }
            | SignalEvent::Answer {
                conversation_id, ..
            }
            | SignalEvent::IceCandidate {
                conversation_id, ..
            }
            | SignalEvent::End {
                conversation_id, ..
            } => conversation_id,
        }
    }

    /// Whether the event concerns the given party.
    ///
    /// Events without an addressee (candidates) concern every party other
    /// than their sender.
    pub fn is_addressed_to(&self, party: &PartyId) -> bool {
        match self.to_party_id() {
            Some(to) => to == party,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peercall_core::IceCandidate;

    #[test]
    fn offer_wire_shape() {
        let event = SignalEvent::Offer {
            offer: SessionDescription::offer("v=0"),
            from_party_id: PartyId::new("alice"),
            to_party_id: PartyId::new("bob"),
            conversation_id: ConversationId::new("conv-1"),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "offer");
        assert_eq!(value["offer"]["type"], "offer");
        assert_eq!(value["offer"]["sdp"], "v=0");
        assert_eq!(value["fromPartyId"], "alice");
        assert_eq!(value["toPartyId"], "bob");
        assert_eq!(value["conversationId"], "conv-1");

        let parsed: SignalEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn candidate_wire_shape_has_no_addressee() {
        let event = SignalEvent::IceCandidate {
            candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9 typ host"),
            from_party_id: PartyId::new("bob"),
            conversation_id: ConversationId::new("conv-1"),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "ice-candidate");
        assert!(value.get("toPartyId").is_none());
        assert_eq!(
            value["candidate"]["candidate"],
            "candidate:1 1 udp 1 10.0.0.1 9 typ host"
        );

        assert!(event.is_addressed_to(&PartyId::new("alice")));
        assert_eq!(event.kind(), "ice-candidate");
    }

    #[test]
    fn end_wire_shape() {
        let event = SignalEvent::End {
            from_party_id: PartyId::new("bob"),
            to_party_id: PartyId::new("alice"),
            conversation_id: ConversationId::new("conv-1"),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: SignalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), "end");
        assert!(parsed.is_addressed_to(&PartyId::new("alice")));
        assert!(!parsed.is_addressed_to(&PartyId::new("carol")));
    }

    #[test]
    fn answer_round_trips() {
        let event = SignalEvent::Answer {
            answer: SessionDescription::answer("v=0\r\n"),
            from_party_id: PartyId::new("bob"),
            to_party_id: PartyId::new("alice"),
            conversation_id: ConversationId::new("conv-2"),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: SignalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.conversation_id().as_str(), "conv-2");
    }
}
