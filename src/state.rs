//! UI-visible projections of the call and mesh sessions.
//!
//! Sessions never touch the store directly: their handlers return
//! [`StatePatch`] values and the session manager hands them to an
//! [`ApplicationState`] adapter.

use crate::media::{LocalMediaStream, RemoteMediaStream};
use crate::signaling::{ActiveUser, GroupCallRoom};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    #[default]
    Unavailable,
    Available,
    Requested,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CallRejection {
    pub rejected: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChatMessage {
    pub received: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatePatch {
    LocalStream(Option<LocalMediaStream>),
    RemoteStream(Option<RemoteMediaStream>),
    CallState(CallState),
    CallingDialogVisible(bool),
    CallerUsername(String),
    CallRejected(CallRejection),
    LocalCameraEnabled(bool),
    LocalMicrophoneEnabled(bool),
    ScreenSharingActive(bool),
    /// Clears per-call fields after a hangup
    ResetCallData,
    GroupCallActive(bool),
    GroupCallStreams(Vec<RemoteMediaStream>),
    /// Clears group-call fields and makes the process callable again
    ClearGroupCallData,
    Message(ChatMessage),
    Username(String),
    ActiveUsers(Vec<ActiveUser>),
    GroupCallRooms(Vec<GroupCallRoom>),
    SignalingLost,
}

/// Sink for state patches produced by the sessions
pub trait ApplicationState: Send + Sync {
    fn apply(&self, patch: StatePatch);

    fn apply_all(&self, patches: Vec<StatePatch>) {
        for patch in patches {
            self.apply(patch);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSnapshot {
    pub local_stream: Option<LocalMediaStream>,
    pub remote_stream: Option<RemoteMediaStream>,
    pub call_state: CallState,
    pub calling_dialog_visible: bool,
    pub caller_username: String,
    pub call_rejected: CallRejection,
    pub local_camera_enabled: bool,
    pub local_microphone_enabled: bool,
    pub screen_sharing_active: bool,
    pub group_call_active: bool,
    pub group_call_streams: Vec<RemoteMediaStream>,
    pub message: ChatMessage,
    pub username: String,
    pub active_users: Vec<ActiveUser>,
    pub group_call_rooms: Vec<GroupCallRoom>,
    pub signaling_lost: bool,
}

impl Default for AppSnapshot {
    fn default() -> Self {
        Self {
            local_stream: None,
            remote_stream: None,
            call_state: CallState::Unavailable,
            calling_dialog_visible: false,
            caller_username: String::new(),
            call_rejected: CallRejection::default(),
            local_camera_enabled: true,
            local_microphone_enabled: true,
            screen_sharing_active: false,
            group_call_active: false,
            group_call_streams: Vec::new(),
            message: ChatMessage::default(),
            username: String::new(),
            active_users: Vec::new(),
            group_call_rooms: Vec::new(),
            signaling_lost: false,
        }
    }
}

impl AppSnapshot {
    pub fn reduce(&mut self, patch: StatePatch) {
        match patch {
            StatePatch::LocalStream(stream) => self.local_stream = stream,
            StatePatch::RemoteStream(stream) => self.remote_stream = stream,
            StatePatch::CallState(state) => self.call_state = state,
            StatePatch::CallingDialogVisible(visible) => self.calling_dialog_visible = visible,
            StatePatch::CallerUsername(name) => self.caller_username = name,
            StatePatch::CallRejected(rejection) => self.call_rejected = rejection,
            StatePatch::LocalCameraEnabled(on) => self.local_camera_enabled = on,
            StatePatch::LocalMicrophoneEnabled(on) => self.local_microphone_enabled = on,
            StatePatch::ScreenSharingActive(on) => self.screen_sharing_active = on,
            StatePatch::ResetCallData => {
                self.remote_stream = None;
                self.screen_sharing_active = false;
                self.caller_username.clear();
                self.local_microphone_enabled = true;
                self.local_camera_enabled = true;
                self.calling_dialog_visible = false;
            }
            StatePatch::GroupCallActive(active) => self.group_call_active = active,
            StatePatch::GroupCallStreams(streams) => self.group_call_streams = streams,
            StatePatch::ClearGroupCallData => {
                self.group_call_active = false;
                self.group_call_streams.clear();
                self.call_state = CallState::Available;
                self.local_microphone_enabled = true;
                self.local_camera_enabled = true;
            }
            StatePatch::Message(message) => self.message = message,
            StatePatch::Username(name) => self.username = name,
            StatePatch::ActiveUsers(users) => self.active_users = users,
            StatePatch::GroupCallRooms(rooms) => self.group_call_rooms = rooms,
            StatePatch::SignalingLost => self.signaling_lost = true,
        }
    }
}

/// In-process store; UI code subscribes to snapshot changes.
pub struct AppStateStore {
    tx: watch::Sender<AppSnapshot>,
}

impl AppStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AppSnapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<AppSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> AppSnapshot {
        self.tx.borrow().clone()
    }
}

impl Default for AppStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationState for AppStateStore {
    fn apply(&self, patch: StatePatch) {
        tracing::trace!(?patch, "state patch");
        self.tx.send_modify(|snapshot| snapshot.reduce(patch));
    }
}
