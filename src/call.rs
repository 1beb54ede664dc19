//! One-to-one call negotiation.
//!
//! `CallSession` walks a single call attempt through
//! `AVAILABLE → (REQUESTED) → IN_PROGRESS → AVAILABLE`. Async negotiation runs
//! on a [`NegotiationWorker`]; its completions come back through
//! [`CallSession::on_notice`] and are dropped when their generation no longer
//! matches, which is how a hangup or rejection abandons in-flight steps.

use crate::error::{Error, Result};
use crate::media::{LocalMediaStream, MediaCapture, MediaStream, RemoteMediaStream};
use crate::peer::ice::CandidateQueue;
use crate::peer::negotiation::{NegotiationOutcome, NegotiationStep, NegotiationWorker};
use crate::peer::transport::{
    CallNotice, Generation, NoticeKind, NoticeSender, PeerTransport, TransportEvent,
    TransportFactory,
};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::signaling::{
    ActiveUser, Callee, Caller, IncomingPreOffer, PreOfferAnswer, SignalingChannel,
};
use crate::state::{CallRejection, CallState, ChatMessage, StatePatch};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const REASON_NOT_AVAILABLE: &str = "Callee is not able to pick up the call right now";
pub const REASON_REJECTED: &str = "Call rejected by the callee";

/// Who may create the offer for the current call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationRole {
    #[default]
    None,
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallSide {
    Caller,
    Callee,
}

pub struct CallSession {
    state: CallState,
    side: Option<CallSide>,
    role: NegotiationRole,
    peer: Option<String>,
    local_media: Option<LocalMediaStream>,
    remote_media: Option<RemoteMediaStream>,
    candidates: CandidateQueue,
    screen_share: Option<MediaStream>,
    data_channel_open: bool,
    generation: Generation,
    transport: Option<Arc<dyn PeerTransport>>,
    worker: Option<NegotiationWorker>,
    factory: Arc<dyn TransportFactory>,
    signaling: SignalingChannel,
    notices: mpsc::UnboundedSender<CallNotice>,
}

impl CallSession {
    pub fn new(
        signaling: SignalingChannel,
        factory: Arc<dyn TransportFactory>,
        notices: mpsc::UnboundedSender<CallNotice>,
    ) -> Self {
        Self {
            state: CallState::Unavailable,
            side: None,
            role: NegotiationRole::None,
            peer: None,
            local_media: None,
            remote_media: None,
            candidates: CandidateQueue::new(),
            screen_share: None,
            data_channel_open: false,
            generation: 0,
            transport: None,
            worker: None,
            factory,
            signaling,
            notices,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn remote_media(&self) -> Option<&RemoteMediaStream> {
        self.remote_media.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_remote_description_set(&self) -> bool {
        self.candidates.is_remote_description_set()
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_share.is_some()
    }

    pub fn is_data_channel_open(&self) -> bool {
        self.data_channel_open
    }

    /// True while no call is pending or running.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, CallState::Unavailable | CallState::Available)
    }

    /// Local media present and no call in flight.
    pub fn check_if_call_is_possible(&self) -> bool {
        self.local_media.is_some() && self.state == CallState::Available
    }

    pub fn on_local_media_ready(&mut self, stream: LocalMediaStream) -> Vec<StatePatch> {
        self.local_media = Some(stream.clone());
        let mut patches = vec![StatePatch::LocalStream(Some(stream))];
        if self.state == CallState::Unavailable {
            self.state = CallState::Available;
            patches.push(StatePatch::CallState(CallState::Available));
        }
        patches
    }

    pub fn place_call(&mut self, callee: &ActiveUser, username: &str) -> Vec<StatePatch> {
        if !self.check_if_call_is_possible() {
            tracing::warn!(state = ?self.state, "cannot place call now");
            return Vec::new();
        }
        self.peer = Some(callee.socket_id.clone());
        self.side = Some(CallSide::Caller);
        self.state = CallState::InProgress;
        tracing::info!(callee = %callee.socket_id, "sending pre-offer");
        if let Err(err) = self.signaling.send_pre_offer(
            Callee {
                socket_id: callee.socket_id.clone(),
                username: callee.username.clone(),
            },
            Caller {
                username: username.to_owned(),
            },
        ) {
            tracing::warn!("pre-offer not sent: {err}");
        }
        vec![
            StatePatch::CallRejected(CallRejection::default()),
            StatePatch::CallState(CallState::InProgress),
            StatePatch::CallingDialogVisible(true),
        ]
    }

    /// `engaged_elsewhere` is set while a group call owns the process.
    pub fn on_pre_offer(
        &mut self,
        offer: IncomingPreOffer,
        engaged_elsewhere: bool,
    ) -> Vec<StatePatch> {
        if engaged_elsewhere || !self.check_if_call_is_possible() {
            tracing::info!(caller = %offer.caller_socket_id, "busy, declining pre-offer");
            self.answer_pre_offer(&offer.caller_socket_id, PreOfferAnswer::CallNotAvailable);
            return Vec::new();
        }
        self.peer = Some(offer.caller_socket_id);
        self.side = Some(CallSide::Callee);
        self.state = CallState::Requested;
        vec![
            StatePatch::CallerUsername(offer.caller_username),
            StatePatch::CallState(CallState::Requested),
        ]
    }

    pub async fn accept(&mut self) -> Vec<StatePatch> {
        if self.state != CallState::Requested {
            return Vec::new();
        }
        let Some(peer) = self.peer.clone() else {
            return Vec::new();
        };
        self.answer_pre_offer(&peer, PreOfferAnswer::CallAccepted);
        self.state = CallState::InProgress;
        let mut patches = vec![StatePatch::CallState(CallState::InProgress)];
        if !self.ensure_transport().await {
            patches.extend(self.abort_call().await);
        }
        patches
    }

    pub async fn reject(&mut self) -> Vec<StatePatch> {
        if self.state != CallState::Requested {
            return Vec::new();
        }
        if let Some(peer) = self.peer.clone() {
            self.answer_pre_offer(&peer, PreOfferAnswer::CallRejected);
        }
        self.reset().await
    }

    pub async fn on_pre_offer_answer(&mut self, answer: PreOfferAnswer) -> Vec<StatePatch> {
        if !self.is_dialing() {
            tracing::debug!(?answer, "ignoring pre-offer answer outside of a dial");
            return Vec::new();
        }
        let mut patches = vec![StatePatch::CallingDialogVisible(false)];
        let reason = match answer {
            PreOfferAnswer::CallAccepted => {
                if !self.ensure_transport().await {
                    patches.extend(self.abort_call().await);
                    return patches;
                }
                self.role = NegotiationRole::Offerer;
                self.submit(NegotiationStep::CreateOffer);
                return patches;
            }
            PreOfferAnswer::CallNotAvailable => REASON_NOT_AVAILABLE,
            PreOfferAnswer::CallRejected => REASON_REJECTED,
        };
        tracing::info!(reason, "call rejected");
        patches.push(StatePatch::CallRejected(CallRejection {
            rejected: true,
            reason: reason.to_owned(),
        }));
        patches.extend(self.reset().await);
        patches
    }

    pub async fn on_offer(&mut self, offer: SessionDescription) -> Vec<StatePatch> {
        if self.state != CallState::InProgress || self.side != Some(CallSide::Callee) {
            tracing::debug!("ignoring offer outside of an accepted call");
            return Vec::new();
        }
        if self.role == NegotiationRole::Offerer {
            tracing::warn!("offer received while offering, ignoring");
            return Vec::new();
        }
        if !self.ensure_transport().await {
            return self.abort_call().await;
        }
        self.role = NegotiationRole::Answerer;
        self.submit(NegotiationStep::AcceptOffer(offer));
        Vec::new()
    }

    pub fn on_answer(&mut self, answer: SessionDescription) {
        if self.state != CallState::InProgress || self.role != NegotiationRole::Offerer {
            tracing::debug!(role = ?self.role, "ignoring answer");
            return;
        }
        self.submit(NegotiationStep::AcceptAnswer(answer));
    }

    pub fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.state != CallState::InProgress {
            tracing::debug!("dropping candidate outside of a call");
            return;
        }
        match self.candidates.admit(candidate) {
            Some(candidate) => self.submit(NegotiationStep::AddCandidate(candidate)),
            None => tracing::debug!(
                queued = self.candidates.len(),
                "remote description not set yet, queuing candidate"
            ),
        }
    }

    pub async fn hang_up(&mut self) -> Vec<StatePatch> {
        if self.is_idle() {
            return Vec::new();
        }
        if let Some(peer) = self.peer.clone() {
            if let Err(err) = self.signaling.send_user_hanged_up(&peer) {
                tracing::warn!("hangup not sent: {err}");
            }
        }
        self.reset().await
    }

    pub async fn on_remote_hang_up(&mut self) -> Vec<StatePatch> {
        if self.is_idle() {
            return Vec::new();
        }
        tracing::info!("remote peer hung up");
        self.reset().await
    }

    /// Ends the call without a HANGUP; the relay that would carry it is gone.
    pub async fn on_signaling_lost(&mut self) -> Vec<StatePatch> {
        if self.is_idle() {
            return Vec::new();
        }
        tracing::warn!(state = ?self.state, "signaling lost, ending call");
        self.reset().await
    }

    /// Swaps the outbound camera track for a screen capture or back.
    pub async fn toggle_screen_share(&mut self, capture: &dyn MediaCapture) -> Vec<StatePatch> {
        let Some(transport) = self.transport.clone() else {
            tracing::warn!("screen share needs an established call");
            return Vec::new();
        };
        match self.screen_share.take() {
            None => {
                let share = match capture.display_media().await {
                    Ok(share) => share,
                    Err(err) => {
                        tracing::error!("screen capture failed: {err}");
                        return Vec::new();
                    }
                };
                let Some(track) = share.video_track() else {
                    tracing::error!("screen capture has no video track");
                    share.stop();
                    return Vec::new();
                };
                if let Err(err) = transport.replace_video_track(track).await {
                    tracing::error!("cannot switch to screen share: {err}");
                    share.stop();
                    return Vec::new();
                }
                self.screen_share = Some(share);
                vec![StatePatch::ScreenSharingActive(true)]
            }
            Some(share) => {
                let camera = self.local_media.as_ref().and_then(|m| m.video_track());
                if let Some(camera) = camera {
                    if let Err(err) = transport.replace_video_track(camera).await {
                        tracing::error!("cannot restore camera track: {err}");
                    }
                }
                share.stop();
                vec![StatePatch::ScreenSharingActive(false)]
            }
        }
    }

    /// Writes chat text to the open data channel. Nothing is buffered.
    pub async fn send_message(&self, text: String) -> Result<()> {
        if !self.data_channel_open {
            return Err(Error::ChannelNotOpen);
        }
        let transport = self.transport.clone().ok_or(Error::NoActiveCall)?;
        transport.send_text(text).await
    }

    pub async fn on_notice(&mut self, notice: CallNotice) -> Vec<StatePatch> {
        if notice.generation != self.generation {
            tracing::debug!(
                stale = notice.generation,
                current = self.generation,
                "discarding stale call notice"
            );
            return Vec::new();
        }
        match notice.kind {
            NoticeKind::Negotiation(outcome) => {
                self.on_negotiation(outcome);
                Vec::new()
            }
            NoticeKind::Transport(event) => self.on_transport_event(event).await,
        }
    }

    fn on_negotiation(&mut self, outcome: NegotiationOutcome) {
        match outcome {
            NegotiationOutcome::OfferReady(offer) => {
                if let Some(peer) = self.peer.as_deref() {
                    if let Err(err) = self.signaling.send_webrtc_offer(peer, &offer) {
                        tracing::warn!("offer not sent: {err}");
                    }
                }
            }
            NegotiationOutcome::RemoteDescriptionSet => {
                let queued = self.candidates.release();
                if !queued.is_empty() {
                    tracing::debug!(count = queued.len(), "flushing queued candidates");
                }
                for candidate in queued {
                    self.submit(NegotiationStep::AddCandidate(candidate));
                }
            }
            NegotiationOutcome::AnswerReady(answer) => {
                if let Some(peer) = self.peer.as_deref() {
                    if let Err(err) = self.signaling.send_webrtc_answer(peer, &answer) {
                        tracing::warn!("answer not sent: {err}");
                    }
                }
            }
            NegotiationOutcome::CandidateApplied => tracing::trace!("candidate applied"),
            NegotiationOutcome::Failed { step, error } => {
                tracing::warn!(step, "negotiation step failed, skipping: {error}");
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Vec<StatePatch> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if self.state == CallState::InProgress {
                    if let Some(peer) = self.peer.as_deref() {
                        if let Err(err) = self.signaling.send_webrtc_candidate(peer, &candidate) {
                            tracing::warn!("candidate not sent: {err}");
                        }
                    }
                }
                Vec::new()
            }
            TransportEvent::RemoteStream(mut stream) => {
                if self.remote_media.as_ref().map(|s| &s.id) == Some(&stream.id) {
                    return Vec::new();
                }
                stream.peer_id = self.peer.clone();
                self.remote_media = Some(stream.clone());
                vec![StatePatch::RemoteStream(Some(stream))]
            }
            TransportEvent::ChannelOpen => {
                self.data_channel_open = true;
                Vec::new()
            }
            TransportEvent::ChannelClosed => {
                self.data_channel_open = false;
                Vec::new()
            }
            TransportEvent::Message(content) => vec![StatePatch::Message(ChatMessage {
                received: true,
                content,
            })],
            TransportEvent::Connected => {
                tracing::info!(peer = ?self.peer, "connected with other peer");
                Vec::new()
            }
            TransportEvent::Failed => {
                if self.is_idle() {
                    return Vec::new();
                }
                tracing::error!(peer = ?self.peer, "peer transport failed, ending call");
                self.hang_up().await
            }
        }
    }

    fn is_dialing(&self) -> bool {
        self.state == CallState::InProgress
            && self.side == Some(CallSide::Caller)
            && self.role == NegotiationRole::None
    }

    fn answer_pre_offer(&self, caller_socket_id: &str, answer: PreOfferAnswer) {
        if let Err(err) = self.signaling.send_pre_offer_answer(caller_socket_id, answer) {
            tracing::warn!(?answer, "pre-offer answer not sent: {err}");
        }
    }

    fn submit(&self, step: NegotiationStep) {
        let submitted = match &self.worker {
            Some(worker) => worker.submit(step),
            None => false,
        };
        if !submitted {
            tracing::warn!("no negotiation worker, step dropped");
        }
    }

    async fn ensure_transport(&mut self) -> bool {
        if self.transport.is_some() {
            return true;
        }
        let Some(local) = self.local_media.clone() else {
            tracing::error!("{}", Error::MediaUnavailable);
            return false;
        };
        let notices = NoticeSender::new(self.generation, self.notices.clone());
        match self.factory.create(&local, notices.clone()).await {
            Ok(transport) => {
                self.worker = Some(NegotiationWorker::spawn(transport.clone(), notices));
                self.transport = Some(transport);
                true
            }
            Err(err) => {
                tracing::error!("cannot create peer transport: {err}");
                false
            }
        }
    }

    async fn abort_call(&mut self) -> Vec<StatePatch> {
        if let Some(peer) = self.peer.clone() {
            if let Err(err) = self.signaling.send_user_hanged_up(&peer) {
                tracing::warn!("hangup not sent: {err}");
            }
        }
        self.reset().await
    }

    /// Abandons the current attempt: in-flight steps are aborted, the
    /// transport closed and every per-call field cleared.
    async fn reset(&mut self) -> Vec<StatePatch> {
        self.generation += 1;
        self.worker = None;
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                tracing::warn!("transport close failed: {err}");
            }
        }
        self.candidates.clear();
        self.peer = None;
        self.side = None;
        self.role = NegotiationRole::None;
        self.remote_media = None;
        self.data_channel_open = false;
        if let Some(share) = self.screen_share.take() {
            share.stop();
        }
        if let Some(local) = &self.local_media {
            local.enable_all();
        }
        self.state = if self.local_media.is_some() {
            CallState::Available
        } else {
            CallState::Unavailable
        };
        tracing::debug!(generation = self.generation, "call session reset");
        vec![StatePatch::ResetCallData, StatePatch::CallState(self.state)]
    }
}
