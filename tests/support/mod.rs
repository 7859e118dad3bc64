#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use smartcall::auth::AuthSession;
use smartcall::config::CallConfig;
use smartcall::coordinator::{CallContext, CallEvent};
use smartcall::error::MediaError;
use smartcall::media::{MediaConstraints, MediaSource, SyntheticMediaSource};
use smartcall::peer::{
    LinkStateHandler, LocalCandidateHandler, LocalMediaStream, PeerConnectionAdapter, PeerFactory,
    PeerLinkState, RemoteTrack, RemoteTrackHandler, TrackKind,
};
use smartcall::session::{CandidateSide, IceCandidate, SdpType, SessionDescription};
use smartcall::signaling::memory::MemorySignaling;
use smartcall::signaling::SignalingChannel;
use smartcall::{PeerError, SessionId};

#[derive(Default)]
struct Descriptions {
    local: Option<SdpType>,
    remote: Option<SdpType>,
}

/// A candidate the remote side appends while a given one is being applied.
struct Interleave {
    after: String,
    signaling: MemorySignaling,
    id: SessionId,
    side: CandidateSide,
    candidate: String,
}

/// Scripted peer connection. Enforces the same ordering rules as a real
/// engine and records every call in order.
#[derive(Default)]
pub struct MockPeer {
    log: Mutex<Vec<String>>,
    descriptions: Mutex<Descriptions>,
    on_candidate: Mutex<Option<Arc<dyn Fn(IceCandidate) + Send + Sync>>>,
    on_track: Mutex<Option<Arc<dyn Fn(RemoteTrack) + Send + Sync>>>,
    on_link: Mutex<Option<Arc<dyn Fn(PeerLinkState) + Send + Sync>>>,
    closed: AtomicUsize,
    interleave: Mutex<Option<Interleave>>,
}

impl MockPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log.lock().iter().position(|e| e == entry)
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix("candidate:").map(str::to_string))
            .collect()
    }

    pub fn has_remote(&self) -> bool {
        self.descriptions.lock().remote.is_some()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn emit_local_candidate(&self, candidate: &str) {
        let handler = self.on_candidate.lock().clone();
        if let Some(handler) = handler {
            handler(IceCandidate::new(candidate));
        }
    }

    pub fn emit_remote_track(&self) {
        let handler = self.on_track.lock().clone();
        if let Some(handler) = handler {
            handler(RemoteTrack {
                id: "remote-video".into(),
                stream_id: "remote".into(),
                kind: TrackKind::Video,
            });
        }
    }

    pub fn emit_link(&self, state: PeerLinkState) {
        let handler = self.on_link.lock().clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }

    /// While `after` is being applied, appends `candidate` to the stored
    /// `side` of call `id` and yields before returning.
    pub fn interleave_on_apply(
        &self,
        after: &str,
        signaling: &MemorySignaling,
        id: &SessionId,
        side: CandidateSide,
        candidate: &str,
    ) {
        *self.interleave.lock() = Some(Interleave {
            after: after.into(),
            signaling: signaling.clone(),
            id: id.clone(),
            side,
            candidate: candidate.into(),
        });
    }

    pub fn has_observers(&self) -> bool {
        self.on_candidate.lock().is_some()
            || self.on_track.lock().is_some()
            || self.on_link.lock().is_some()
    }
}

#[async_trait]
impl PeerConnectionAdapter for MockPeer {
    async fn attach_local_tracks(&self, stream: &LocalMediaStream) -> Result<(), PeerError> {
        self.record(format!("attach:{}", stream.tracks.len()));
        Ok(())
    }

    async fn detach_local_tracks(&self) -> Result<(), PeerError> {
        self.record("detach");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let desc = self.descriptions.lock();
        if desc.local.is_some() || desc.remote.is_some() {
            return Err(PeerError::InvalidState("offer in non-stable state".into()));
        }
        drop(desc);
        self.record("create_offer");
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        if self.descriptions.lock().remote != Some(SdpType::Offer) {
            return Err(PeerError::InvalidState("answer without remote offer".into()));
        }
        self.record("create_answer");
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.descriptions.lock().local = Some(desc.sdp_type);
        self.record(format!("set_local:{:?}", desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let mut descriptions = self.descriptions.lock();
        if descriptions.remote.is_some() {
            return Err(PeerError::InvalidState("remote description already set".into()));
        }
        descriptions.remote = Some(desc.sdp_type);
        drop(descriptions);
        self.record(format!("set_remote:{:?}", desc.sdp_type));
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.has_remote()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if !self.has_remote() {
            return Err(PeerError::InvalidState(
                "candidate before remote description".into(),
            ));
        }
        self.record(format!("candidate:{}", candidate.candidate));
        let interleave = {
            let mut slot = self.interleave.lock();
            match slot.as_ref() {
                Some(i) if i.after == candidate.candidate => slot.take(),
                _ => None,
            }
        };
        if let Some(i) = interleave {
            i.signaling
                .append_candidate(&i.id, i.side, IceCandidate::new(i.candidate))
                .await
                .map_err(|e| PeerError::Engine(e.to_string()))?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        *self.on_candidate.lock() = Some(Arc::from(handler));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        *self.on_track.lock() = Some(Arc::from(handler));
    }

    fn on_link_state(&self, handler: LinkStateHandler) {
        *self.on_link.lock() = Some(Arc::from(handler));
    }

    fn clear_observers(&self) {
        *self.on_candidate.lock() = None;
        *self.on_track.lock() = None;
        *self.on_link.lock() = None;
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.record("close");
        Ok(())
    }
}

/// Hands out fresh [`MockPeer`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockPeerFactory {
    pub created: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockPeerFactory {
    pub fn latest(&self) -> Option<Arc<MockPeer>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create(
        &self,
        _config: &CallConfig,
    ) -> Result<Arc<dyn PeerConnectionAdapter>, PeerError> {
        let peer = MockPeer::new();
        self.created.lock().push(peer.clone());
        Ok(peer as Arc<dyn PeerConnectionAdapter>)
    }
}

/// Synthetic capture that counts releases.
#[derive(Default)]
pub struct CountingMedia {
    source: SyntheticMediaSource,
    stops: AtomicUsize,
}

impl CountingMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for CountingMedia {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError> {
        self.source.acquire(constraints).await
    }

    fn stop(&self, stream: &LocalMediaStream) -> usize {
        self.stops.fetch_add(1, Ordering::SeqCst);
        stream.stop()
    }
}

pub fn context(signaling: &MemorySignaling) -> CallContext {
    context_with_media(signaling, Arc::new(SyntheticMediaSource::new()))
}

pub fn context_with_media(signaling: &MemorySignaling, media: Arc<dyn MediaSource>) -> CallContext {
    CallContext {
        signaling: Arc::new(signaling.clone()),
        media,
        auth: AuthSession::new("ada@example.org", "test-token"),
        config: CallConfig::local_only(),
    }
}

/// Polls `cond` until it holds; panics after a generous timeout.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    deadline.await.expect("condition not reached in time");
}

/// Lets spawned tasks run without advancing much time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<CallEvent>) -> Vec<CallEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
