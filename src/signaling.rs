//! Relay transport: `{event, data}` JSON envelopes over a WebSocket.
//!
//! Inbound envelopes are decoded into [`SignalEvent`]s and forwarded to the
//! session loop; outbound traffic goes through [`SignalingChannel`], which has
//! one sender per wire event. Delivery is at-most-once and nothing is buffered
//! across reconnects.
//!
//! Only the event names and payloads follow the socket.io relay. Frames are
//! plain WebSocket text with one envelope each and no engine.io/socket.io
//! framing, so a socket.io server needs a bridge in front of it.

use crate::error::{Error, Result};
use crate::peer::types::{IceCandidate, SessionDescription};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

pub mod events {
    pub const CONNECTION: &str = "connection";
    pub const REGISTER_NEW_USER: &str = "register-new-user";
    pub const BROADCAST: &str = "broadcast";
    pub const PRE_OFFER: &str = "pre-offer";
    pub const PRE_OFFER_ANSWER: &str = "pre-offer-answer";
    pub const WEBRTC_OFFER: &str = "webRTC-offer";
    pub const WEBRTC_ANSWER: &str = "webRTC-answer";
    pub const WEBRTC_CANDIDATE: &str = "webRTC-candidate";
    pub const USER_HANGED_UP: &str = "user-hanged-up";
    pub const GROUP_CALL_REGISTER: &str = "group-call-register";
    pub const GROUP_CALL_JOIN_REQUEST: &str = "group-call-join-request";
    pub const GROUP_CALL_USER_LEFT: &str = "group-call-user-left";
    pub const GROUP_CALL_CLOSED_BY_HOST: &str = "group-call-closed-by-host";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreOfferAnswer {
    CallAccepted,
    CallRejected,
    CallNotAvailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub username: String,
    pub socket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupCallRoom {
    pub room_id: String,
    pub socket_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Broadcast {
    #[serde(rename_all = "camelCase")]
    ActiveUsers { active_users: Vec<ActiveUser> },
    #[serde(rename_all = "camelCase")]
    GroupCallRooms { group_call_rooms: Vec<GroupCallRoom> },
}

// ---- inbound payloads ----

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub socket_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPreOffer {
    pub caller_socket_id: String,
    #[serde(default)]
    pub caller_username: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IncomingPreOfferAnswer {
    pub answer: PreOfferAnswer,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IncomingOffer {
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IncomingAnswer {
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IncomingCandidate {
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub peer_id: String,
    #[serde(default, alias = "localStreamId")]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub stream_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

/// Typed inbound relay event
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Connected(Connected),
    Broadcast(Broadcast),
    PreOffer(IncomingPreOffer),
    PreOfferAnswer(IncomingPreOfferAnswer),
    Offer(IncomingOffer),
    Answer(IncomingAnswer),
    Candidate(IncomingCandidate),
    UserHangedUp,
    GroupCallJoinRequest(JoinRequest),
    GroupCallUserLeft(UserLeft),
    /// Relay connection lost; produced locally, never on the wire
    Closed,
}

impl SignalEvent {
    /// Decodes an envelope. Unknown event names yield `Ok(None)`.
    pub fn from_envelope(envelope: Envelope) -> Result<Option<Self>> {
        use events::*;
        let data = envelope.data;
        let event = match envelope.event.as_str() {
            CONNECTION => SignalEvent::Connected(serde_json::from_value(data)?),
            BROADCAST => SignalEvent::Broadcast(serde_json::from_value(data)?),
            PRE_OFFER => SignalEvent::PreOffer(serde_json::from_value(data)?),
            PRE_OFFER_ANSWER => SignalEvent::PreOfferAnswer(serde_json::from_value(data)?),
            WEBRTC_OFFER => SignalEvent::Offer(serde_json::from_value(data)?),
            WEBRTC_ANSWER => SignalEvent::Answer(serde_json::from_value(data)?),
            WEBRTC_CANDIDATE => SignalEvent::Candidate(serde_json::from_value(data)?),
            USER_HANGED_UP => SignalEvent::UserHangedUp,
            GROUP_CALL_JOIN_REQUEST => {
                SignalEvent::GroupCallJoinRequest(serde_json::from_value(data)?)
            }
            GROUP_CALL_USER_LEFT => SignalEvent::GroupCallUserLeft(serde_json::from_value(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn from_text(text: &str) -> Result<Option<Self>> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }
}

// ---- outbound payloads ----

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Callee {
    pub socket_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Caller {
    pub username: String,
}

/// Outbound half of the relay; one method per wire event
#[derive(Debug, Clone)]
pub struct SignalingChannel {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl SignalingChannel {
    /// Channel whose envelopes land on the returned receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit<T: Serialize>(&self, event: &str, payload: T) -> Result<()> {
        let data = serde_json::to_value(payload)?;
        tracing::debug!(event, "signal out");
        self.tx
            .send(Envelope {
                event: event.to_owned(),
                data,
            })
            .map_err(|_| Error::SignalingClosed)
    }

    pub fn register_new_user(&self, username: &str, socket_id: &str) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            username: &'a str,
            socket_id: &'a str,
        }
        self.emit(
            events::REGISTER_NEW_USER,
            Payload {
                username,
                socket_id,
            },
        )
    }

    pub fn send_pre_offer(&self, callee: Callee, caller: Caller) -> Result<()> {
        #[derive(Serialize)]
        struct Payload {
            callee: Callee,
            caller: Caller,
        }
        self.emit(events::PRE_OFFER, Payload { callee, caller })
    }

    pub fn send_pre_offer_answer(&self, caller_socket_id: &str, answer: PreOfferAnswer) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            caller_socket_id: &'a str,
            answer: PreOfferAnswer,
        }
        self.emit(
            events::PRE_OFFER_ANSWER,
            Payload {
                caller_socket_id,
                answer,
            },
        )
    }

    pub fn send_webrtc_offer(&self, callee_socket_id: &str, offer: &SessionDescription) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            callee_socket_id: &'a str,
            offer: &'a SessionDescription,
        }
        self.emit(
            events::WEBRTC_OFFER,
            Payload {
                callee_socket_id,
                offer,
            },
        )
    }

    pub fn send_webrtc_answer(&self, caller_socket_id: &str, answer: &SessionDescription) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            caller_socket_id: &'a str,
            answer: &'a SessionDescription,
        }
        self.emit(
            events::WEBRTC_ANSWER,
            Payload {
                caller_socket_id,
                answer,
            },
        )
    }

    pub fn send_webrtc_candidate(&self, connected_user_socket_id: &str, candidate: &IceCandidate) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            candidate: &'a IceCandidate,
            connected_user_socket_id: &'a str,
        }
        self.emit(
            events::WEBRTC_CANDIDATE,
            Payload {
                candidate,
                connected_user_socket_id,
            },
        )
    }

    pub fn send_user_hanged_up(&self, connected_user_socket_id: &str) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            connected_user_socket_id: &'a str,
        }
        self.emit(
            events::USER_HANGED_UP,
            Payload {
                connected_user_socket_id,
            },
        )
    }

    pub fn register_group_call(&self, username: &str, peer_id: &str) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            username: &'a str,
            peer_id: &'a str,
        }
        self.emit(events::GROUP_CALL_REGISTER, Payload { username, peer_id })
    }

    pub fn join_group_call(
        &self,
        peer_id: &str,
        host_socket_id: &str,
        room_id: &str,
        local_stream_id: &str,
    ) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            peer_id: &'a str,
            host_socket_id: &'a str,
            room_id: &'a str,
            local_stream_id: &'a str,
        }
        self.emit(
            events::GROUP_CALL_JOIN_REQUEST,
            Payload {
                peer_id,
                host_socket_id,
                room_id,
                local_stream_id,
            },
        )
    }

    pub fn leave_group_call(&self, stream_id: &str, room_id: &str) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            stream_id: &'a str,
            room_id: &'a str,
        }
        self.emit(events::GROUP_CALL_USER_LEFT, Payload { stream_id, room_id })
    }

    pub fn close_group_call(&self, peer_id: &str) -> Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload<'a> {
            peer_id: &'a str,
        }
        self.emit(events::GROUP_CALL_CLOSED_BY_HOST, Payload { peer_id })
    }
}

/// Maps `http(s)://` relay addresses onto `ws(s)://`.
pub fn derive_websocket_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| Error::SignalingConnect(format!("{raw}: {e}")))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => {
            return Err(Error::SignalingConnect(format!(
                "unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::SignalingConnect(format!("cannot rewrite scheme of {raw}")))?;
    Ok(url)
}

/// Opens the relay socket. Decoded events go to `inbound`; `SignalEvent::Closed`
/// is sent once when the socket ends.
pub async fn connect(
    signaling_url: &str,
    inbound: mpsc::UnboundedSender<SignalEvent>,
) -> Result<SignalingChannel> {
    let url = derive_websocket_url(signaling_url)?;
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|err| Error::SignalingConnect(format!("websocket connect failed: {err}")))?;
    tracing::info!(url = %url, "signaling websocket connected");
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (channel, mut outbound) = SignalingChannel::new();

    tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(text) => {
                    if ws_write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::warn!("dropping unserializable envelope: {err}"),
            }
        }
        let _ = ws_write.close().await;
    });

    tokio::spawn(async move {
        while let Some(msg) = ws_read.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!("signaling websocket error: {err}");
                    break;
                }
            };
            match SignalEvent::from_text(&text) {
                Ok(Some(event)) => {
                    if inbound.send(event).is_err() {
                        return;
                    }
                }
                Ok(None) => tracing::debug!("ignoring unknown signaling event"),
                Err(err) => tracing::warn!("malformed signaling message: {err}"),
            }
        }
        tracing::warn!("signaling websocket closed");
        let _ = inbound.send(SignalEvent::Closed);
    });

    Ok(channel)
}
