use super::{SessionHandle, UserCommand};
use crate::error::Result;
use crate::signaling::ActiveUser;

impl SessionHandle {
    /// Dials `callee`; the outcome shows up as state patches.
    pub async fn place_call(&self, callee: ActiveUser) -> Result<()> {
        self.send(UserCommand::PlaceCall(callee)).await
    }

    pub async fn accept_call(&self) -> Result<()> {
        self.send(UserCommand::Accept).await
    }

    pub async fn reject_call(&self) -> Result<()> {
        self.send(UserCommand::Reject).await
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.send(UserCommand::HangUp).await
    }

    pub async fn toggle_screen_share(&self) -> Result<()> {
        self.send(UserCommand::ToggleScreenShare).await
    }
}
