use super::{SessionHandle, UserCommand};
use crate::error::{Error, Result};
use tokio::sync::oneshot;

impl SessionHandle {
    pub async fn login(&self, username: impl Into<String>) -> Result<()> {
        self.send(UserCommand::Login(username.into())).await
    }

    /// Chat over the data channel. Fails with `ChannelNotOpen` before it is up.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(UserCommand::SendMessage {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<()> {
        self.send(UserCommand::SetCameraEnabled(enabled)).await
    }

    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<()> {
        self.send(UserCommand::SetMicrophoneEnabled(enabled)).await
    }
}
