//! Wire definitions for the signaling protocol.
//!
//! A [`Envelope`] is the single unit exchanged over a relay connection. The
//! `id` field is reused bidirectionally: a client fills it with the
//! *destination* identifier when sending, and the relay rewrites it to the
//! *source* identifier before delivery, so a recipient always sees who a
//! message came from. Keeping this in a dedicated crate lets the relay and
//! the client negotiate against the same types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// One signaling message, as exchanged with the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Destination identifier on send; source identifier on receive.
    pub id: String,
    #[serde(flatten)]
    pub body: EnvelopeBody,
}

/// Type-dependent payload. The `type` tag fully determines which payload
/// fields are present; anything with an unrecognized tag fails to decode and
/// is dropped at the receiving boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EnvelopeBody {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mid: Option<String>,
    },
    Bye,
    Ready,
    UserOffline,
    UserBusy,
}

impl Envelope {
    pub fn offer(id: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: EnvelopeBody::Offer { sdp: sdp.into() },
        }
    }

    pub fn answer(id: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: EnvelopeBody::Answer { sdp: sdp.into() },
        }
    }

    pub fn candidate(
        id: impl Into<String>,
        candidate: impl Into<String>,
        mid: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            body: EnvelopeBody::Candidate {
                candidate: candidate.into(),
                mid,
            },
        }
    }

    pub fn bye(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: EnvelopeBody::Bye,
        }
    }

    pub fn ready(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: EnvelopeBody::Ready,
        }
    }

    pub fn user_offline(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: EnvelopeBody::UserOffline,
        }
    }

    pub fn user_busy(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: EnvelopeBody::UserBusy,
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(text).map_err(|e| ProtoError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Malformed(e.to_string()))
    }

    /// The wire tag, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self.body {
            EnvelopeBody::Offer { .. } => "offer",
            EnvelopeBody::Answer { .. } => "answer",
            EnvelopeBody::Candidate { .. } => "candidate",
            EnvelopeBody::Bye => "bye",
            EnvelopeBody::Ready => "ready",
            EnvelopeBody::UserOffline => "useroffline",
            EnvelopeBody::UserBusy => "userbusy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_offer() {
        let json = r#"{"id": "bob", "type": "offer", "sdp": "v=0\r\n..."}"#;
        let envelope = Envelope::decode(json).unwrap();
        assert_eq!(envelope.id, "bob");
        match envelope.body {
            EnvelopeBody::Offer { sdp } => assert!(sdp.starts_with("v=0")),
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[test]
    fn decode_candidate_without_mid() {
        let json = r#"{"id": "bob", "type": "candidate", "candidate": "candidate:1 1 UDP ..."}"#;
        let envelope = Envelope::decode(json).unwrap();
        match envelope.body {
            EnvelopeBody::Candidate { candidate, mid } => {
                assert!(candidate.starts_with("candidate:"));
                assert_eq!(mid, None);
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn encode_uses_wire_tags() {
        let json = Envelope::answer("alice", "v=0").encode().unwrap();
        assert!(json.contains(r#""type":"answer""#));
        assert!(json.contains(r#""id":"alice""#));

        let json = Envelope::user_offline("carol").encode().unwrap();
        assert!(json.contains(r#""type":"useroffline""#));
        let json = Envelope::user_busy("carol").encode().unwrap();
        assert!(json.contains(r#""type":"userbusy""#));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Envelope::decode(r#"{"id": "bob", "type": "shrug"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn missing_payload_is_rejected() {
        // An offer without its sdp must not decode as an offer.
        let err = Envelope::decode(r#"{"id": "bob", "type": "offer"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn round_trip() {
        let envelope = Envelope::candidate("bob", "candidate:1", Some("0".into()));
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
