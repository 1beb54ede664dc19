use crate::error::Result;
use crate::media::{LocalMediaStream, MediaTrack, RemoteMediaStream};
use crate::peer::negotiation::NegotiationOutcome;
use crate::peer::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Incremented on every call reset; notices carrying an older value are stale.
pub type Generation = u64;

/// Asynchronous happenings on the peer transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    RemoteStream(RemoteMediaStream),
    ChannelOpen,
    ChannelClosed,
    Message(String),
    Connected,
    /// The transport is gone and will not recover
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoticeKind {
    Transport(TransportEvent),
    Negotiation(NegotiationOutcome),
}

/// Completion or transport event, tagged with the generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct CallNotice {
    pub generation: Generation,
    pub kind: NoticeKind,
}

/// Generation-stamped sender handed to a transport and its worker
#[derive(Debug, Clone)]
pub struct NoticeSender {
    generation: Generation,
    tx: mpsc::UnboundedSender<CallNotice>,
}

impl NoticeSender {
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<CallNotice>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn transport(&self, event: TransportEvent) -> bool {
        self.send(NoticeKind::Transport(event))
    }

    pub fn negotiation(&self, outcome: NegotiationOutcome) -> bool {
        self.send(NoticeKind::Negotiation(outcome))
    }

    fn send(&self, kind: NoticeKind) -> bool {
        self.tx
            .send(CallNotice {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// One peer-to-peer media link with its chat channel
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates the chat channel; only the offering side calls this.
    async fn open_data_channel(&self) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Swaps the outbound video track in place, without renegotiation.
    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()>;

    async fn send_text(&self, text: String) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Builds a transport carrying `local`'s tracks. Every event it raises
    /// goes through `notices`.
    async fn create(
        &self,
        local: &LocalMediaStream,
        notices: NoticeSender,
    ) -> Result<Arc<dyn PeerTransport>>;
}
