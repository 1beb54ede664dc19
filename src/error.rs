use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("signaling connect failed: {0}")]
    SignalingConnect(String),

    #[error("signaling channel closed")]
    SignalingClosed,

    #[error("malformed signaling payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("webrtc error: {0}")]
    Transport(#[from] webrtc::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("media capture failed: {0}")]
    Capture(String),

    #[error("track {0} has ended")]
    TrackEnded(String),

    #[error("no outbound video sender on the transport")]
    NoVideoSender,

    #[error("chat channel is not open")]
    ChannelNotOpen,

    #[error("no call in progress")]
    NoActiveCall,

    #[error("local media is not ready")]
    MediaUnavailable,

    #[error("already engaged in another call")]
    Busy,

    #[error("session loop stopped")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
