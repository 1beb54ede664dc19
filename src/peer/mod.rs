pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod negotiation;
pub mod transport;
pub mod types;

pub use connection::{WebRtcTransport, WebRtcTransportFactory, GRACE_PERIOD};
pub use ice::CandidateQueue;
pub use negotiation::{NegotiationOutcome, NegotiationStep, NegotiationWorker};
pub use transport::{
    CallNotice, Generation, NoticeKind, NoticeSender, PeerTransport, TransportEvent,
    TransportFactory,
};
pub use types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
