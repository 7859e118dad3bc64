use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session_id::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as persisted in the call record: `{ type, sdp }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in its JSON form, matching what browsers produce with
/// `RTCIceCandidate.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// `host`, `srflx`, `prflx` or `relay`, read from the `typ` attribute.
    pub fn kind(&self) -> Option<&str> {
        let mut parts = self.candidate.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "typ" {
                return parts.next();
            }
        }
        None
    }
}

/// Which side of the negotiation this participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Caller,
    Callee,
}

impl PeerRole {
    /// Sequence this role's local candidates are appended to.
    pub fn outbound(self) -> CandidateSide {
        match self {
            PeerRole::Caller => CandidateSide::Offer,
            PeerRole::Callee => CandidateSide::Answer,
        }
    }

    /// Sequence this role reads the remote candidates from.
    pub fn inbound(self) -> CandidateSide {
        match self {
            PeerRole::Caller => CandidateSide::Answer,
            PeerRole::Callee => CandidateSide::Offer,
        }
    }
}

/// One of the two append-only candidate sub-collections of a call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateSide {
    #[serde(rename = "offerCandidates")]
    Offer,
    #[serde(rename = "answerCandidates")]
    Answer,
}

impl CandidateSide {
    pub fn collection(self) -> &'static str {
        match self {
            CandidateSide::Offer => "offerCandidates",
            CandidateSide::Answer => "answerCandidates",
        }
    }
}

/// The shared call record. Candidate sequences live in their own
/// sub-collections and are delivered separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: SessionId,
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            offer: None,
            answer: None,
            created_at: Utc::now(),
        }
    }

    /// Remote description a participant in `role` waits for.
    pub fn remote_description(&self, role: PeerRole) -> Option<&SessionDescription> {
        match role {
            PeerRole::Caller => self.answer.as_ref(),
            PeerRole::Callee => self.offer.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_uses_browser_field_names() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "offer", "sdp": "v=0" }));
    }

    #[test]
    fn candidate_parses_browser_json() {
        let cand: IceCandidate = serde_json::from_value(serde_json::json!({
            "candidate": "candidate:1 1 udp 2130706431 192.168.1.2 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "usernameFragment": "abcd"
        }))
        .unwrap();
        assert_eq!(cand.sdp_mline_index, Some(0));
        assert_eq!(cand.username_fragment.as_deref(), Some("abcd"));
        assert_eq!(cand.kind(), Some("host"));
    }

    #[test]
    fn roles_read_what_the_other_side_writes() {
        for role in [PeerRole::Caller, PeerRole::Callee] {
            let other = match role {
                PeerRole::Caller => PeerRole::Callee,
                PeerRole::Callee => PeerRole::Caller,
            };
            assert_eq!(role.inbound(), other.outbound());
            assert_ne!(role.inbound(), role.outbound());
        }
    }
}
