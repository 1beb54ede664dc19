//! Group call over a full mesh.
//!
//! Every participant keeps one link per other participant through a
//! [`MeshEndpoint`]. The endpoint is addressed by a peer id it learns once
//! opened; inbound links are answered with the local stream automatically and
//! every remote stream, inbound or outbound, comes back as
//! [`MeshEvent::StreamAdded`].

use crate::error::Result;
use crate::media::{LocalMediaStream, RemoteMediaStream};
use crate::peer::transport::Generation;
use crate::signaling::{GroupCallRoom, JoinRequest, SignalingChannel, UserLeft};
use crate::state::{CallState, StatePatch};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// The endpoint is reachable under `peer_id`
    Opened { peer_id: String },
    StreamAdded(RemoteMediaStream),
    /// The endpoint lost its broker and is unusable
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshNotice {
    pub generation: Generation,
    pub event: MeshEvent,
}

#[derive(Debug, Clone)]
pub struct MeshNoticeSender {
    generation: Generation,
    tx: mpsc::UnboundedSender<MeshNotice>,
}

impl MeshNoticeSender {
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<MeshNotice>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn send(&self, event: MeshEvent) -> bool {
        self.tx
            .send(MeshNotice {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// One participant's side of the mesh. The crate ships no implementation;
/// the embedding application supplies one (and its [`MeshEndpointFactory`])
/// on top of whatever peer-to-peer media library it uses.
#[async_trait]
pub trait MeshEndpoint: Send + Sync {
    /// Opens a link to `peer_id` carrying the local stream.
    async fn connect(&self, peer_id: &str) -> Result<()>;

    /// Closes every link. A destroyed endpoint is not reused.
    async fn destroy(&self);
}

/// Provided by the embedder, see [`MeshEndpoint`].
#[async_trait]
pub trait MeshEndpointFactory: Send + Sync {
    async fn open(
        &self,
        local: &LocalMediaStream,
        notices: MeshNoticeSender,
    ) -> Result<Arc<dyn MeshEndpoint>>;
}

pub struct MeshSession {
    active: bool,
    is_host: bool,
    room_id: Option<String>,
    peer_id: Option<String>,
    participants: BTreeMap<String, RemoteMediaStream>,
    local_media: Option<LocalMediaStream>,
    endpoint: Option<Arc<dyn MeshEndpoint>>,
    factory: Arc<dyn MeshEndpointFactory>,
    generation: Generation,
    signaling: SignalingChannel,
    notices: mpsc::UnboundedSender<MeshNotice>,
}

impl MeshSession {
    pub fn new(
        signaling: SignalingChannel,
        factory: Arc<dyn MeshEndpointFactory>,
        notices: mpsc::UnboundedSender<MeshNotice>,
    ) -> Self {
        Self {
            active: false,
            is_host: false,
            room_id: None,
            peer_id: None,
            participants: BTreeMap::new(),
            local_media: None,
            endpoint: None,
            factory,
            generation: 0,
            signaling,
            notices,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn participants(&self) -> Vec<RemoteMediaStream> {
        self.participants.values().cloned().collect()
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Opens the mesh endpoint for `local`. The peer id arrives later as
    /// [`MeshEvent::Opened`].
    pub async fn open(&mut self, local: LocalMediaStream) {
        self.local_media = Some(local);
        self.open_endpoint().await;
    }

    pub async fn on_notice(&mut self, notice: MeshNotice) -> Vec<StatePatch> {
        if notice.generation != self.generation {
            tracing::debug!(
                stale = notice.generation,
                current = self.generation,
                "discarding stale mesh notice"
            );
            return Vec::new();
        }
        match notice.event {
            MeshEvent::Opened { peer_id } => {
                tracing::info!(%peer_id, "mesh endpoint open");
                self.peer_id = Some(peer_id);
                Vec::new()
            }
            MeshEvent::StreamAdded(stream) => self.add_stream(stream),
            MeshEvent::Closed => {
                tracing::warn!(active = self.active, "mesh endpoint closed");
                if self.active {
                    return self.clear().await;
                }
                self.generation += 1;
                self.peer_id = None;
                self.endpoint = None;
                self.open_endpoint().await;
                Vec::new()
            }
        }
    }

    pub fn create_room(&mut self, username: &str) -> Vec<StatePatch> {
        if self.active {
            tracing::warn!("already in a group call");
            return Vec::new();
        }
        let Some(peer_id) = self.peer_id.clone() else {
            tracing::warn!("mesh endpoint not open, cannot host");
            return Vec::new();
        };
        if let Err(err) = self.signaling.register_group_call(username, &peer_id) {
            tracing::warn!("group call registration not sent: {err}");
            return Vec::new();
        }
        tracing::info!(%peer_id, "hosting group call");
        self.is_host = true;
        self.active = true;
        self.room_id = None;
        vec![
            StatePatch::GroupCallActive(true),
            StatePatch::CallState(CallState::InProgress),
        ]
    }

    pub fn join_room(&mut self, host_socket_id: &str, room_id: &str) -> Vec<StatePatch> {
        if self.active {
            tracing::warn!("already in a group call");
            return Vec::new();
        }
        let (Some(peer_id), Some(local)) = (self.peer_id.clone(), self.local_media.as_ref())
        else {
            tracing::warn!("mesh endpoint or local media not ready, cannot join");
            return Vec::new();
        };
        if let Err(err) =
            self.signaling
                .join_group_call(&peer_id, host_socket_id, room_id, local.id())
        {
            tracing::warn!("join request not sent: {err}");
            return Vec::new();
        }
        tracing::info!(room_id, host = host_socket_id, "joining group call");
        self.is_host = false;
        self.active = true;
        self.room_id = Some(room_id.to_owned());
        vec![
            StatePatch::GroupCallActive(true),
            StatePatch::CallState(CallState::InProgress),
        ]
    }

    /// A newcomer announced itself; link to it with the local stream.
    pub async fn on_join_request(&mut self, request: JoinRequest) {
        if !self.active {
            tracing::debug!(peer = %request.peer_id, "join request while idle, ignoring");
            return;
        }
        if let (Some(ours), Some(theirs)) = (&self.room_id, &request.room_id) {
            if ours != theirs {
                tracing::debug!(room = %theirs, "join request for another room, ignoring");
                return;
            }
        }
        if self.peer_id.as_deref() == Some(request.peer_id.as_str()) {
            return;
        }
        let Some(endpoint) = self.endpoint.clone() else {
            tracing::warn!("no mesh endpoint, cannot reach {}", request.peer_id);
            return;
        };
        if let Err(err) = endpoint.connect(&request.peer_id).await {
            tracing::warn!(peer = %request.peer_id, "cannot reach new participant: {err}");
        }
    }

    pub fn add_stream(&mut self, stream: RemoteMediaStream) -> Vec<StatePatch> {
        let own_stream = self.local_media.as_ref().map(|m| m.id()) == Some(stream.id.as_str());
        let own_peer = stream.peer_id.is_some() && stream.peer_id == self.peer_id;
        if own_stream || own_peer {
            return Vec::new();
        }
        if !self.active {
            tracing::debug!(stream = %stream.id, "stream outside of a group call, ignoring");
            return Vec::new();
        }
        if self.participants.contains_key(&stream.id) {
            return Vec::new();
        }
        tracing::info!(stream = %stream.id, "participant stream added");
        self.participants.insert(stream.id.clone(), stream);
        vec![StatePatch::GroupCallStreams(self.participants())]
    }

    pub fn remove_stream(&mut self, left: UserLeft) -> Vec<StatePatch> {
        if self.participants.remove(&left.stream_id).is_none() {
            return Vec::new();
        }
        tracing::info!(stream = %left.stream_id, "participant left");
        vec![StatePatch::GroupCallStreams(self.participants())]
    }

    pub async fn leave(&mut self) -> Vec<StatePatch> {
        if !self.active {
            return Vec::new();
        }
        let sent = if self.is_host {
            match self.peer_id.as_deref() {
                Some(peer_id) => self.signaling.close_group_call(peer_id),
                None => Ok(()),
            }
        } else {
            match (self.local_media.as_ref(), self.room_id.as_deref()) {
                (Some(local), Some(room_id)) => self.signaling.leave_group_call(local.id(), room_id),
                _ => Ok(()),
            }
        };
        if let Err(err) = sent {
            tracing::warn!("leave notice not sent: {err}");
        }
        self.clear().await
    }

    /// Checks the local room against the relay roster. A host first adopts
    /// the room id assigned to it by the relay.
    pub async fn reconcile(
        &mut self,
        rooms: &[GroupCallRoom],
        own_socket_id: Option<&str>,
    ) -> Vec<StatePatch> {
        if !self.active {
            return Vec::new();
        }
        if self.is_host && self.room_id.is_none() {
            let hosted = rooms.iter().find(|room| {
                own_socket_id == Some(room.socket_id.as_str())
                    || (room.peer_id.is_some() && room.peer_id == self.peer_id)
            });
            match hosted {
                Some(room) => {
                    tracing::info!(room_id = %room.room_id, "hosted room registered");
                    self.room_id = Some(room.room_id.clone());
                }
                None => return Vec::new(),
            }
        }
        let Some(room_id) = self.room_id.as_deref() else {
            return Vec::new();
        };
        if rooms.iter().any(|room| room.room_id == room_id) {
            return Vec::new();
        }
        tracing::warn!(room_id, "room vanished from roster, clearing group call");
        self.clear().await
    }

    /// Drops all mesh state and replaces the endpoint with a fresh one.
    pub async fn clear(&mut self) -> Vec<StatePatch> {
        self.generation += 1;
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.destroy().await;
        }
        self.peer_id = None;
        self.active = false;
        self.is_host = false;
        self.room_id = None;
        self.participants.clear();
        if let Some(local) = &self.local_media {
            local.enable_all();
        }
        self.open_endpoint().await;
        vec![StatePatch::ClearGroupCallData]
    }

    async fn open_endpoint(&mut self) {
        let Some(local) = self.local_media.clone() else {
            return;
        };
        let notices = MeshNoticeSender::new(self.generation, self.notices.clone());
        match self.factory.open(&local, notices).await {
            Ok(endpoint) => self.endpoint = Some(endpoint),
            Err(err) => tracing::error!("cannot open mesh endpoint: {err}"),
        }
    }
}
