pub mod connection;
pub mod engine;
pub mod ice;
pub mod session;
pub mod state;
pub mod types;

pub use connection::{LocalTracks, WebRtcEngine, WebRtcEngineFactory};
pub use engine::{EngineEvent, EngineEventKind, EngineFactory, MediaEngine, TransportState};
pub use session::{AppEvent, NegotiationSession};
pub use state::{CallRole, NegotiationState, GRACE_PERIOD};
pub use types::{IceCandidate, SdpPayload, ServerConfig};
