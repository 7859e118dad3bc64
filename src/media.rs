use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MediaError;
use crate::peer::types::{LocalMediaStream, LocalTrack, TrackKind};
use crate::utils::random_doc_id;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Local capture devices (camera, microphone).
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError>;

    /// Releases the devices behind `stream`. Returns how many tracks were
    /// still live.
    fn stop(&self, stream: &LocalMediaStream) -> usize {
        let stopped = stream.stop();
        info!(stream = %stream.id, stopped, "local media stopped");
        stopped
    }
}

/// Produces track descriptors without touching real devices. Samples can be
/// written to the attached engine tracks by the embedding application.
#[derive(Debug, Default)]
pub struct SyntheticMediaSource {
    acquired: AtomicUsize,
}

impl SyntheticMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::NothingRequested);
        }

        let stream_id = format!("stream-{}", random_doc_id());
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(format!("{stream_id}-audio"), TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(format!("{stream_id}-video"), TrackKind::Video));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        info!(stream = %stream_id, tracks = tracks.len(), "local media acquired");

        Ok(LocalMediaStream {
            id: stream_id,
            tracks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_requested_kinds() {
        let source = SyntheticMediaSource::new();
        let stream = source
            .acquire(MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();
        assert_eq!(stream.tracks.len(), 1);
        assert_eq!(stream.tracks[0].kind, TrackKind::Audio);
        assert_eq!(source.acquired(), 1);
    }

    #[tokio::test]
    async fn nothing_requested_is_an_error() {
        let source = SyntheticMediaSource::new();
        let none = MediaConstraints {
            audio: false,
            video: false,
        };
        assert_eq!(
            source.acquire(none).await.unwrap_err(),
            MediaError::NothingRequested
        );
    }

    #[tokio::test]
    async fn stop_releases_each_track_once() {
        let source = SyntheticMediaSource::new();
        let stream = source.acquire(MediaConstraints::default()).await.unwrap();
        assert_eq!(source.stop(&stream), 2);
        assert_eq!(source.stop(&stream), 0);
    }
}
