//! Core data types.
//!
//! Plain presence data shared by the registry, the proximity filter and
//! the wire protocol. Nothing in here knows about sockets or locks.

pub mod position;
pub mod player;

// Re-export core types
pub use position::Position;
pub use player::{Player, PlayerId, MapId};
