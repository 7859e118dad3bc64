pub mod adapter;
pub mod connection;
pub mod ice;
pub mod types;

pub use adapter::{
    LinkStateHandler, LocalCandidateHandler, PeerConnectionAdapter, PeerFactory,
    RemoteTrackHandler,
};
pub use connection::{WebRtcPeer, WebRtcPeerFactory};
pub use ice::{CandidateQueue, DrainReport, SharedCandidateQueue};
pub use types::{LocalMediaStream, LocalTrack, PeerLinkState, RemoteTrack, TrackKind};
