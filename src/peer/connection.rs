use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::adapter::{
    LinkStateHandler, LocalCandidateHandler, PeerConnectionAdapter, PeerFactory,
    RemoteTrackHandler,
};
use super::types::{LocalMediaStream, PeerLinkState, RemoteTrack, TrackKind};
use crate::config::{CallConfig, ServerConfig};
use crate::error::PeerError;
use crate::logger::dump_candidate;
use crate::session::{IceCandidate, SessionDescription};
use crate::utils::add_ice_url_scheme;

type CandidateSlot = Arc<Mutex<Option<Arc<dyn Fn(IceCandidate) + Send + Sync>>>>;
type TrackSlot = Arc<Mutex<Option<Arc<dyn Fn(RemoteTrack) + Send + Sync>>>>;
type LinkSlot = Arc<Mutex<Option<Arc<dyn Fn(PeerLinkState) + Send + Sync>>>>;

fn empty_slot<T: ?Sized>() -> Arc<Mutex<Option<Arc<T>>>> {
    Arc::new(Mutex::new(None))
}

/// [`PeerConnectionAdapter`] backed by a webrtc-rs `RTCPeerConnection`.
///
/// Engine callbacks are registered once at construction and forward to
/// replaceable observer slots, so observers can be cleared without touching
/// the engine.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    senders: AsyncMutex<HashMap<String, Arc<RTCRtpSender>>>,
    local_candidate: CandidateSlot,
    remote_track: TrackSlot,
    link_state: LinkSlot,
}

impl WebRtcPeer {
    pub async fn new(config: &CallConfig) -> Result<Self, PeerError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(api.new_peer_connection(rtc_config(config)).await?);
        info!(
            ice_servers = config.ice_servers.len(),
            "peer connection created"
        );

        let peer = Self {
            pc,
            senders: AsyncMutex::new(HashMap::new()),
            local_candidate: empty_slot(),
            remote_track: empty_slot(),
            link_state: empty_slot(),
        };
        peer.register_engine_callbacks();
        Ok(peer)
    }

    fn register_engine_callbacks(&self) {
        let slot = self.local_candidate.clone();
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                let handler = slot.lock().clone();
                Box::pin(async move {
                    // None marks the end of gathering.
                    let Some(cand) = cand else {
                        debug!("ICE candidate gathering completed");
                        return;
                    };
                    match cand.to_json() {
                        Ok(init) => {
                            let candidate = IceCandidate::from(init);
                            dump_candidate("LOCAL", &candidate);
                            if let Some(handler) = handler {
                                handler(candidate);
                            }
                        }
                        Err(e) => warn!("failed to serialize local candidate: {e}"),
                    }
                })
            }));

        self.pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        let slot = self.remote_track.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let remote = RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind: TrackKind::from(track.kind()),
                };
                info!(track = %remote.id, kind = ?remote.kind, "remote track arrived");
                if let Some(handler) = slot.lock().clone() {
                    handler(remote);
                }
                Box::pin(async {})
            },
        ));

        let slot = self.link_state.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                info!("peer connection state changed to: {st:?}");
                if let Some(handler) = slot.lock().clone() {
                    handler(PeerLinkState::from(st));
                }
                Box::pin(async {})
            }));
    }
}

#[async_trait]
impl PeerConnectionAdapter for WebRtcPeer {
    async fn attach_local_tracks(&self, stream: &LocalMediaStream) -> Result<(), PeerError> {
        let mut senders = self.senders.lock().await;
        for track in &stream.tracks {
            if senders.contains_key(&track.id) {
                debug!(track = %track.id, "track already attached");
                continue;
            }
            let mime_type = match track.kind {
                TrackKind::Audio => MIME_TYPE_OPUS,
                TrackKind::Video => MIME_TYPE_VP8,
            };
            let local = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id.clone(),
                stream.id.clone(),
            ));
            let sender = self
                .pc
                .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            debug!(track = %track.id, kind = ?track.kind, "local track attached");
            senders.insert(track.id.clone(), sender);
        }
        Ok(())
    }

    async fn detach_local_tracks(&self) -> Result<(), PeerError> {
        let mut senders = self.senders.lock().await;
        for (id, sender) in senders.drain() {
            if let Err(e) = self.pc.remove_track(&sender).await {
                warn!(track = %id, "failed to remove track: {e}");
            }
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        if self.pc.signaling_state() != RTCSignalingState::Stable {
            return Err(PeerError::InvalidState(format!(
                "cannot create offer in signaling state {:?}",
                self.pc.signaling_state()
            )));
        }
        let offer = self.pc.create_offer(None).await?;
        SessionDescription::try_from(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        if self.pc.signaling_state() != RTCSignalingState::HaveRemoteOffer {
            return Err(PeerError::InvalidState(
                "cannot create answer before a remote offer is set".into(),
            ));
        }
        let answer = self.pc.create_answer(None).await?;
        SessionDescription::try_from(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        if self.pc.remote_description().await.is_some() {
            return Err(PeerError::InvalidState(
                "remote description already set for this round".into(),
            ));
        }
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if self.pc.remote_description().await.is_none() {
            return Err(PeerError::InvalidState(
                "cannot add candidate before remote description".into(),
            ));
        }
        dump_candidate("REMOTE", &candidate);
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        *self.local_candidate.lock() = Some(Arc::from(handler));
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        *self.remote_track.lock() = Some(Arc::from(handler));
    }

    fn on_link_state(&self, handler: LinkStateHandler) {
        *self.link_state.lock() = Some(Arc::from(handler));
    }

    fn clear_observers(&self) {
        self.local_candidate.lock().take();
        self.remote_track.lock().take();
        self.link_state.lock().take();
    }

    async fn close(&self) -> Result<(), PeerError> {
        info!("closing peer connection");
        self.pc.close().await?;
        Ok(())
    }
}

/// Creates a [`WebRtcPeer`] per call attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcPeerFactory;

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        config: &CallConfig,
    ) -> Result<Arc<dyn PeerConnectionAdapter>, PeerError> {
        Ok(Arc::new(WebRtcPeer::new(config).await?))
    }
}

/// Engine configuration for a call.
pub fn rtc_config(config: &CallConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&config.ice_servers),
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}
