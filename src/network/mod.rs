//! Network Layer
//!
//! WebSocket endpoints, per-connection sessions and fan-out.
//! Presence state lives in `presence/`; this layer only routes it.

pub mod protocol;
pub mod channel;
pub mod directory;
pub mod broadcaster;
pub mod relay;
pub mod session;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, UpstreamMessage, ProtocolError,
    ConnectPayload, SignalingPayload, SignalKind, AllMapsPayload, PositionPayload,
};
pub use channel::{ClientChannel, ConnectionId, DeliveryError};
pub use directory::ConnectionDirectory;
pub use broadcaster::{BroadcastReport, ProximityBroadcaster};
pub use relay::{RelayOutcome, SignalingRelay};
pub use session::{ClientSession, ConnectionState, Dispatch};
pub use server::{VoiceServer, ServerConfig, ConfigError, VoiceServerError};
