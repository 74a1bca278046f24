//! # Proximity Voice Server
//!
//! Relay between an MMO world simulation and voice-chat clients.
//! The world pushes full player snapshots; each connected client receives
//! the players it can hear and can exchange peer negotiation messages with
//! other clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PROXIMITY VOICE SERVER                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Presence data                           │
//! │  ├── position.rs   - World coordinates and distance          │
//! │  └── player.rs     - Player record and identity              │
//! │                                                              │
//! │  presence/         - Snapshot state (no I/O)                 │
//! │  ├── snapshot.rs   - Immutable indexed world snapshot        │
//! │  ├── registry.rs   - Atomic snapshot replacement             │
//! │  └── proximity.rs  - Visibility policies                     │
//! │                                                              │
//! │  network/          - WebSocket endpoints                     │
//! │  ├── protocol.rs   - Message envelopes                       │
//! │  ├── channel.rs    - Bounded per-client outbound queue       │
//! │  ├── directory.rs  - Identity -> live connection             │
//! │  ├── broadcaster.rs- Per-client position fan-out             │
//! │  ├── relay.rs      - Signaling forwarding                    │
//! │  ├── session.rs    - Connection lifecycle                    │
//! │  └── server.rs     - Ingest + client accept loops            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! world feed --all-maps--> registry --snapshot--> broadcaster --position--> clients
//! client --signaling--> relay --signaling--> client(s)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod presence;
pub mod network;

// Re-export commonly used types
pub use core::{Player, PlayerId, MapId, Position};
pub use presence::{PresenceRegistry, ProximityPolicy, VisibilityRange, WorldSnapshot};
pub use network::{ServerConfig, VoiceServer, VoiceServerError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
