pub mod call;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod state;
pub mod utils;

pub use call::{CallSession, NegotiationRole};
pub use commands::{SessionHandle, UserCommand};
pub use config::Config;
pub use error::{Error, Result};
pub use media::{LocalMediaStream, MediaCapture, MediaStream, MediaTrack, RemoteMediaStream};
pub use mesh::{MeshEndpoint, MeshEndpointFactory, MeshEvent, MeshNotice, MeshSession};
pub use session::{launch, Collaborators, SessionManager};
pub use signaling::{SignalEvent, SignalingChannel};
pub use state::{AppSnapshot, AppStateStore, ApplicationState, CallState, StatePatch};
