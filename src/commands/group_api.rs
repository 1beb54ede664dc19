use super::{SessionHandle, UserCommand};
use crate::error::Result;

impl SessionHandle {
    pub async fn create_room(&self) -> Result<()> {
        self.send(UserCommand::CreateRoom).await
    }

    pub async fn join_room(
        &self,
        host_socket_id: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Result<()> {
        self.send(UserCommand::JoinRoom {
            host_socket_id: host_socket_id.into(),
            room_id: room_id.into(),
        })
        .await
    }

    /// Leaves the room, or closes it for everyone when hosting.
    pub async fn leave_room(&self) -> Result<()> {
        self.send(UserCommand::LeaveRoom).await
    }
}
