use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::error::PeerError;
use crate::session::{IceCandidate, SdpType, SessionDescription};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for TrackKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }
}

/// Outbound track captured from a local device.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns `true` only for the call that actually stopped the track.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }
}

/// Local capture: a stream id and its tracks.
#[derive(Debug, Clone)]
pub struct LocalMediaStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalMediaStream {
    /// Stops every track; returns how many were still live.
    pub fn stop(&self) -> usize {
        self.tracks.iter().filter(|track| track.stop()).count()
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }
}

/// Inbound track announced by the remote side.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Transport-level state of the underlying peer connection.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeerLinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerLinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerLinkState::Connecting,
            RTCPeerConnectionState::Connected => PeerLinkState::Connected,
            RTCPeerConnectionState::Disconnected => PeerLinkState::Disconnected,
            RTCPeerConnectionState::Failed => PeerLinkState::Failed,
            RTCPeerConnectionState::Closed => PeerLinkState::Closed,
            _ => PeerLinkState::New,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = PeerError;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        Ok(parsed?)
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = PeerError;

    fn try_from(desc: RTCSessionDescription) -> Result<Self, Self::Error> {
        match desc.sdp_type {
            RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
            RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
            other => Err(PeerError::InvalidState(format!(
                "unsupported description type {other}"
            ))),
        }
    }
}
