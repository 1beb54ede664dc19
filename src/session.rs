//! The single actor that owns both sessions.
//!
//! All session state is mutated from [`SessionManager::run`] only. It selects
//! over UI commands, inbound relay events, call notices and mesh notices, and
//! forwards the patches every handler returns to the [`ApplicationState`].

use crate::call::CallSession;
use crate::commands::{SessionHandle, UserCommand};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logger;
use crate::media::{LocalMediaStream, MediaCapture, TrackKind};
use crate::mesh::{MeshEndpointFactory, MeshNotice, MeshSession};
use crate::peer::transport::{CallNotice, TransportFactory};
use crate::peer::WebRtcTransportFactory;
use crate::signaling::{self, Broadcast, SignalEvent, SignalingChannel};
use crate::state::{ApplicationState, StatePatch};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// External pieces a session loop is wired to
pub struct Collaborators {
    pub signaling: SignalingChannel,
    pub transports: Arc<dyn TransportFactory>,
    pub endpoints: Arc<dyn MeshEndpointFactory>,
    pub capture: Arc<dyn MediaCapture>,
    pub state: Arc<dyn ApplicationState>,
}

pub struct SessionManager {
    call: CallSession,
    mesh: MeshSession,
    signaling: SignalingChannel,
    state: Arc<dyn ApplicationState>,
    capture: Arc<dyn MediaCapture>,
    local_media: Option<LocalMediaStream>,
    socket_id: Option<String>,
    username: Option<String>,
    registered: bool,
    commands: mpsc::Receiver<UserCommand>,
    signal_events: mpsc::UnboundedReceiver<SignalEvent>,
    call_notices: mpsc::UnboundedReceiver<CallNotice>,
    mesh_notices: mpsc::UnboundedReceiver<MeshNotice>,
}

impl SessionManager {
    pub fn new(
        collaborators: Collaborators,
        signal_events: mpsc::UnboundedReceiver<SignalEvent>,
    ) -> (Self, SessionHandle) {
        let Collaborators {
            signaling,
            transports,
            endpoints,
            capture,
            state,
        } = collaborators;
        let (handle, commands) = SessionHandle::channel();
        let (call_tx, call_notices) = mpsc::unbounded_channel();
        let (mesh_tx, mesh_notices) = mpsc::unbounded_channel();
        let manager = Self {
            call: CallSession::new(signaling.clone(), transports, call_tx),
            mesh: MeshSession::new(signaling.clone(), endpoints, mesh_tx),
            signaling,
            state,
            capture,
            local_media: None,
            socket_id: None,
            username: None,
            registered: false,
            commands,
            signal_events,
            call_notices,
            mesh_notices,
        };
        (manager, handle)
    }

    pub fn call(&self) -> &CallSession {
        &self.call
    }

    pub fn mesh(&self) -> &MeshSession {
        &self.mesh
    }

    pub fn socket_id(&self) -> Option<&str> {
        self.socket_id.as_deref()
    }

    /// Acquires local media. On failure the client stays UNAVAILABLE.
    pub async fn start(&mut self) {
        let stream = match self.capture.user_media().await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!("error occurred when trying to get access to local stream: {err}");
                return;
            }
        };
        tracing::info!(stream = stream.id(), "local media ready");
        self.local_media = Some(stream.clone());
        let patches = self.call.on_local_media_ready(stream.clone());
        self.publish(patches);
        self.mesh.open(stream).await;
    }

    pub async fn run(mut self) {
        self.start().await;
        loop {
            // completions of work already under way go before new input
            tokio::select! {
                biased;
                Some(notice) = self.call_notices.recv() => {
                    let patches = self.call.on_notice(notice).await;
                    self.publish(patches);
                }
                Some(notice) = self.mesh_notices.recv() => {
                    let patches = self.mesh.on_notice(notice).await;
                    self.publish(patches);
                }
                Some(event) = self.signal_events.recv() => self.handle_signal(event).await,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
        tracing::info!("all session handles dropped, shutting down");
        let mut patches = self.call.hang_up().await;
        patches.extend(self.mesh.leave().await);
        self.publish(patches);
    }

    pub async fn handle_command(&mut self, command: UserCommand) {
        let patches = match command {
            UserCommand::Login(username) => {
                self.username = Some(username.clone());
                self.register_if_ready();
                vec![StatePatch::Username(username)]
            }
            UserCommand::PlaceCall(callee) => {
                if self.mesh.is_active() {
                    tracing::warn!("{}", Error::Busy);
                    return;
                }
                let username = self.username.clone().unwrap_or_default();
                self.call.place_call(&callee, &username)
            }
            UserCommand::Accept => self.call.accept().await,
            UserCommand::Reject => self.call.reject().await,
            UserCommand::HangUp => self.call.hang_up().await,
            UserCommand::ToggleScreenShare => {
                let capture = self.capture.clone();
                self.call.toggle_screen_share(capture.as_ref()).await
            }
            UserCommand::SetCameraEnabled(enabled) => {
                self.set_track_enabled(TrackKind::Video, enabled);
                vec![StatePatch::LocalCameraEnabled(enabled)]
            }
            UserCommand::SetMicrophoneEnabled(enabled) => {
                self.set_track_enabled(TrackKind::Audio, enabled);
                vec![StatePatch::LocalMicrophoneEnabled(enabled)]
            }
            UserCommand::SendMessage { text, reply } => {
                let result = self.call.send_message(text).await;
                if let Err(err) = &result {
                    tracing::warn!("chat message not sent: {err}");
                }
                let _ = reply.send(result);
                return;
            }
            UserCommand::CreateRoom => {
                if !self.call.is_idle() {
                    tracing::warn!("{}", Error::Busy);
                    return;
                }
                let username = self.username.clone().unwrap_or_default();
                self.mesh.create_room(&username)
            }
            UserCommand::JoinRoom {
                host_socket_id,
                room_id,
            } => {
                if !self.call.is_idle() {
                    tracing::warn!("{}", Error::Busy);
                    return;
                }
                self.mesh.join_room(&host_socket_id, &room_id)
            }
            UserCommand::LeaveRoom => self.mesh.leave().await,
        };
        self.publish(patches);
    }

    pub async fn handle_signal(&mut self, event: SignalEvent) {
        let patches = match event {
            SignalEvent::Connected(connected) => {
                tracing::info!(socket_id = %connected.socket_id, "connected to signaling relay");
                self.socket_id = Some(connected.socket_id);
                self.register_if_ready();
                Vec::new()
            }
            SignalEvent::Broadcast(Broadcast::ActiveUsers { active_users }) => {
                let others = active_users
                    .into_iter()
                    .filter(|user| Some(user.socket_id.as_str()) != self.socket_id.as_deref())
                    .collect();
                vec![StatePatch::ActiveUsers(others)]
            }
            SignalEvent::Broadcast(Broadcast::GroupCallRooms { group_call_rooms }) => {
                let mut patches = self
                    .mesh
                    .reconcile(&group_call_rooms, self.socket_id.as_deref())
                    .await;
                let others = group_call_rooms
                    .into_iter()
                    .filter(|room| Some(room.socket_id.as_str()) != self.socket_id.as_deref())
                    .collect();
                patches.push(StatePatch::GroupCallRooms(others));
                patches
            }
            SignalEvent::PreOffer(offer) => self.call.on_pre_offer(offer, self.mesh.is_active()),
            SignalEvent::PreOfferAnswer(answer) => self.call.on_pre_offer_answer(answer.answer).await,
            SignalEvent::Offer(offer) => self.call.on_offer(offer.offer).await,
            SignalEvent::Answer(answer) => {
                self.call.on_answer(answer.answer);
                Vec::new()
            }
            SignalEvent::Candidate(candidate) => {
                self.call.on_remote_candidate(candidate.candidate);
                Vec::new()
            }
            SignalEvent::UserHangedUp => self.call.on_remote_hang_up().await,
            SignalEvent::GroupCallJoinRequest(request) => {
                self.mesh.on_join_request(request).await;
                Vec::new()
            }
            SignalEvent::GroupCallUserLeft(left) => self.mesh.remove_stream(left),
            SignalEvent::Closed => {
                tracing::error!("{}", Error::SignalingClosed);
                let mut patches = self.call.on_signaling_lost().await;
                if self.mesh.is_active() {
                    patches.extend(self.mesh.clear().await);
                }
                patches.push(StatePatch::SignalingLost);
                patches
            }
        };
        self.publish(patches);
    }

    fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        match &self.local_media {
            Some(local) => local.set_kind_enabled(kind, enabled),
            None => tracing::warn!("{}", Error::MediaUnavailable),
        }
    }

    fn register_if_ready(&mut self) {
        if self.registered {
            return;
        }
        let (Some(username), Some(socket_id)) = (&self.username, &self.socket_id) else {
            return;
        };
        match self.signaling.register_new_user(username, socket_id) {
            Ok(()) => self.registered = true,
            Err(err) => tracing::warn!("registration not sent: {err}"),
        }
    }

    fn publish(&self, patches: Vec<StatePatch>) {
        if !patches.is_empty() {
            self.state.apply_all(patches);
        }
    }
}

/// Connects to the relay named in `config` and spawns the session loop on
/// webrtc-backed transports. Group calls run over the caller's `endpoints`.
pub async fn launch(
    config: &Config,
    endpoints: Arc<dyn MeshEndpointFactory>,
    capture: Arc<dyn MediaCapture>,
    state: Arc<dyn ApplicationState>,
) -> Result<(SessionHandle, JoinHandle<()>)> {
    config.validate()?;
    logger::init(config);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let signaling = signaling::connect(&config.signaling_url, inbound_tx).await?;
    let (manager, handle) = SessionManager::new(
        Collaborators {
            signaling,
            transports: Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone())),
            endpoints,
            capture,
            state,
        },
        inbound_rx,
    );
    let task = tokio::spawn(manager.run());
    Ok((handle, task))
}
