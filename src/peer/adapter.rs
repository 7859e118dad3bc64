use std::sync::Arc;

use async_trait::async_trait;

use super::types::{LocalMediaStream, PeerLinkState, RemoteTrack};
use crate::config::CallConfig;
use crate::error::PeerError;
use crate::session::{IceCandidate, SessionDescription};

pub type LocalCandidateHandler = Box<dyn Fn(IceCandidate) + Send + Sync>;
pub type RemoteTrackHandler = Box<dyn Fn(RemoteTrack) + Send + Sync>;
pub type LinkStateHandler = Box<dyn Fn(PeerLinkState) + Send + Sync>;

/// The local peer-connection capability.
///
/// Sequencing follows the offer/answer model: the offering side goes
/// create-offer, set-local, then set-remote once the answer arrives; the
/// answering side goes set-remote, create-answer, set-local. Out-of-turn calls
/// fail with [`PeerError::InvalidState`], as does adding a remote candidate
/// before a remote description exists.
///
/// Observer handlers run on the engine's own tasks. They must not block and
/// should only hand the payload off to the owner's context.
#[async_trait]
pub trait PeerConnectionAdapter: Send + Sync {
    /// Binds outbound tracks. Tracks already attached are skipped.
    async fn attach_local_tracks(&self, stream: &LocalMediaStream) -> Result<(), PeerError>;

    async fn detach_local_tracks(&self) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Rejected if a remote description is already set for this round.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    fn on_local_candidate(&self, handler: LocalCandidateHandler);

    fn on_remote_track(&self, handler: RemoteTrackHandler);

    fn on_link_state(&self, handler: LinkStateHandler);

    /// Unregisters every observer; nothing is delivered afterwards.
    fn clear_observers(&self);

    async fn close(&self) -> Result<(), PeerError>;
}

/// Builds one fresh adapter per call attempt. Adapters are never reused.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, config: &CallConfig)
        -> Result<Arc<dyn PeerConnectionAdapter>, PeerError>;
}
