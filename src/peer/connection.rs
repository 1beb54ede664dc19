use crate::error::{Error, Result};
use crate::logger::{dump_selected_pair, log_candidate};
use crate::media::{LocalMediaStream, MediaTrack, RemoteMediaStream};
use crate::peer::data_channel::{attach_dc, ChannelSlot, CHAT_CHANNEL_LABEL};
use crate::peer::transport::{NoticeSender, PeerTransport, TransportEvent, TransportFactory};
use crate::peer::types::{IceCandidate, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// How long a disconnected transport may take to come back
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Builds `webrtc`-crate peer connections from the configured ICE servers
pub struct WebRtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        local: &LocalMediaStream,
        notices: NoticeSender,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = WebRtcTransport::new(&self.ice_servers, local, notices).await?;
        Ok(Arc::new(transport))
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    chat: ChannelSlot,
    notices: NoticeSender,
    disconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

impl WebRtcTransport {
    pub async fn new(
        servers: &[ServerConfig],
        local: &LocalMediaStream,
        notices: NoticeSender,
    ) -> Result<Self> {
        let api = build_api()?;
        let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);

        for track in local.tracks() {
            pc.add_track(track.rtc_track()).await?;
        }

        let transport = Self {
            pc,
            chat: Arc::new(Mutex::new(None)),
            notices,
            disconnect_task: Arc::new(Mutex::new(None)),
        };
        transport.wire_events();
        tracing::debug!(
            generation = transport.notices.generation(),
            tracks = local.tracks().len(),
            "peer connection created"
        );
        Ok(transport)
    }

    fn wire_events(&self) {
        let notices = self.notices.clone();
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                let notices = notices.clone();
                Box::pin(async move {
                    let Some(cand) = cand else {
                        tracing::debug!("ICE candidate gathering completed");
                        return;
                    };
                    match cand.to_json() {
                        Ok(init) => {
                            let candidate = IceCandidate::from(init);
                            log_candidate("LOCAL", &candidate);
                            notices.transport(TransportEvent::LocalCandidate(candidate));
                        }
                        Err(err) => tracing::warn!("cannot serialize local candidate: {err}"),
                    }
                })
            }));

        let notices = self.notices.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let stream = RemoteMediaStream::new(track.stream_id(), None);
            tracing::info!(stream = %stream.id, kind = %track.kind(), "remote track arrived");
            notices.transport(TransportEvent::RemoteStream(stream));
            Box::pin(async {})
        }));

        let notices = self.notices.clone();
        let slot = self.chat.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let notices = notices.clone();
                let slot = slot.clone();
                Box::pin(async move {
                    attach_dc(&dc, &slot, &notices).await;
                })
            }));

        let notices = self.notices.clone();
        let pending = self.disconnect_task.clone();
        let pc_state = Arc::downgrade(&self.pc);
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                let notices = notices.clone();
                let pending = pending.clone();
                let pc_state = pc_state.clone();
                Box::pin(async move {
                    tracing::debug!("peer connection state changed to {st:?}");
                    match st {
                        RTCPeerConnectionState::Connected => {
                            if let Some(handle) = pending.lock().await.take() {
                                tracing::info!("connection recovered within grace period");
                                handle.abort();
                            }
                            notices.transport(TransportEvent::Connected);
                        }
                        RTCPeerConnectionState::Disconnected => {
                            let mut guard = pending.lock().await;
                            if guard.is_some() {
                                return;
                            }
                            let notices = notices.clone();
                            *guard = Some(tokio::spawn(async move {
                                tracing::warn!(
                                    "transport disconnected, waiting {} s",
                                    GRACE_PERIOD.as_secs()
                                );
                                sleep(GRACE_PERIOD).await;
                                if let Some(pc) = pc_state.upgrade() {
                                    if pc.connection_state() == RTCPeerConnectionState::Connected {
                                        return;
                                    }
                                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                                }
                                notices.transport(TransportEvent::Failed);
                            }));
                        }
                        RTCPeerConnectionState::Failed => {
                            if let Some(handle) = pending.lock().await.take() {
                                handle.abort();
                            }
                            if let Some(pc) = pc_state.upgrade() {
                                dump_selected_pair(&pc, "FAILED").await;
                            }
                            notices.transport(TransportEvent::Failed);
                        }
                        _ => {}
                    }
                })
            }));
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn open_data_channel(&self) -> Result<()> {
        let dc = self
            .pc
            .create_data_channel(CHAT_CHANNEL_LABEL, Some(RTCDataChannelInit::default()))
            .await?;
        attach_dc(&dc, &self.chat, &self.notices).await;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::try_from(offer)?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::try_from(answer)?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(desc.to_rtc()?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(desc.to_rtc()?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        log_candidate("REMOTE", &candidate);
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        for sender in self.pc.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.kind() == RTPCodecType::Video {
                sender.replace_track(Some(track.rtc_track())).await?;
                tracing::info!(track = track.id(), "outbound video track replaced");
                return Ok(());
            }
        }
        Err(Error::NoVideoSender)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let dc = self.chat.lock().await.clone();
        match dc {
            Some(dc) => {
                dc.send_text(text).await?;
                Ok(())
            }
            None => Err(Error::ChannelNotOpen),
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.disconnect_task.lock().await.take() {
            handle.abort();
        }
        if let Some(dc) = self.chat.lock().await.take() {
            let _ = dc.close().await;
        }
        self.pc.close().await?;
        Ok(())
    }
}
