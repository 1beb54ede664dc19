//! Media handles shared between the call and mesh sessions.
//!
//! Device access lives behind [`MediaCapture`]; the sessions only ever see
//! [`MediaStream`] handles and flip their tracks on and off.

use crate::error::{Error, Result};
use crate::utils::random_id;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One outbound track. Capture code feeds it through [`MediaTrack::write_sample`].
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: AtomicBool,
    rtc: Arc<TrackLocalStaticSample>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: &str) -> Arc<Self> {
        let id = id.into();
        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_owned(),
        ));
        Arc::new(Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            rtc,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Ends the track for good; a stopped capture cannot be restarted.
    pub fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Forwards one encoded sample to every bound sender. Returns `Ok(false)`
    /// when the track is disabled and the sample was dropped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if self.is_ended() {
            return Err(Error::TrackEnded(self.id.clone()));
        }
        if !self.is_enabled() {
            return Ok(false);
        }
        self.rtc.write_sample(sample).await?;
        Ok(true)
    }

    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.rtc.clone()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// A set of tracks under one stream id. Cloning shares the tracks.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

pub type LocalMediaStream = MediaStream;

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Camera + microphone stream with fresh track ids.
    pub fn camera(id: impl Into<String>) -> Self {
        let id = id.into();
        let video = MediaTrack::new(format!("{id}-video"), TrackKind::Video, &id);
        let audio = MediaTrack::new(format!("{id}-audio"), TrackKind::Audio, &id);
        Self::new(id, vec![video, audio])
    }

    /// Video-only capture-surface stream under a generated id.
    pub fn screen() -> Self {
        let id = format!("screen-{}", random_id());
        let video = MediaTrack::new(format!("{id}-video"), TrackKind::Video, &id);
        Self::new(id, vec![video])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<Arc<MediaTrack>> {
        self.first_of(TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<Arc<MediaTrack>> {
        self.first_of(TrackKind::Audio)
    }

    fn first_of(&self, kind: TrackKind) -> Option<Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind).cloned()
    }

    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn enable_all(&self) {
        for track in &self.tracks {
            track.set_enabled(true);
        }
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Inbound stream handle received from a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMediaStream {
    pub id: String,
    /// Transport address of the sender, when known
    pub peer_id: Option<String>,
}

impl RemoteMediaStream {
    pub fn new(id: impl Into<String>, peer_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            peer_id,
        }
    }
}

/// Source of local camera/microphone and screen capture streams
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn user_media(&self) -> Result<LocalMediaStream>;

    async fn display_media(&self) -> Result<MediaStream>;
}
