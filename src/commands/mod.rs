//! Commands the UI issues into the session loop.

mod call_api;
mod group_api;
mod util_api;

use crate::error::{Error, Result};
use crate::signaling::ActiveUser;
use tokio::sync::{mpsc, oneshot};

pub const COMMAND_QUEUE_DEPTH: usize = 64;

#[derive(Debug)]
pub enum UserCommand {
    Login(String),
    PlaceCall(ActiveUser),
    Accept,
    Reject,
    HangUp,
    ToggleScreenShare,
    SetCameraEnabled(bool),
    SetMicrophoneEnabled(bool),
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    CreateRoom,
    JoinRoom {
        host_socket_id: String,
        room_id: String,
    },
    LeaveRoom,
}

/// Cloneable front door to a running session loop
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<UserCommand>,
}

impl SessionHandle {
    pub fn channel() -> (Self, mpsc::Receiver<UserCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: UserCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::SessionClosed)
    }
}
