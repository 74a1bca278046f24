//! Player Records
//!
//! Identity and presence data for a single player as reported by the
//! upstream world feed. A `Player` is plain data owned by its map group.

use std::fmt;
use std::num::NonZeroU64;
use serde::{Serialize, Deserialize};

use super::position::Position;

/// Map identifier as used by the world simulation.
pub type MapId = u32;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Stable player identity (`guid` on the wire).
///
/// Always a non-zero JSON integer. Zero, negatives, fractions and strings
/// are rejected when decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(NonZeroU64);

impl PlayerId {
    /// Create from a raw value. Returns `None` for zero.
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Get the raw value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NonZeroU64> for PlayerId {
    fn from(id: NonZeroU64) -> Self {
        Self(id)
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// A player as seen in one world snapshot.
///
/// Only `guid` is required on decode; other missing fields take zero values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Player identity.
    pub guid: PlayerId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// World position.
    #[serde(default)]
    pub position: Position,
    /// Alive flag.
    #[serde(default)]
    pub alive: bool,
    /// Zone identifier.
    #[serde(default)]
    pub zone: u32,
    /// Area identifier.
    #[serde(default)]
    pub area: u32,
    /// Map the player is on.
    #[serde(default)]
    pub map_id: MapId,
}

impl Player {
    /// Create a living player at a position with zone and area zeroed.
    pub fn new(guid: PlayerId, name: impl Into<String>, map_id: MapId, position: Position) -> Self {
        Self {
            guid,
            name: name.into(),
            position,
            alive: true,
            zone: 0,
            area: 0,
            map_id,
        }
    }

    /// Squared planar distance to another player.
    #[inline]
    pub fn distance_sq(&self, other: &Player) -> f64 {
        self.position.planar_distance_sq(&other.position)
    }
}

#[cfg(test)]
pub(crate) fn test_id(raw: u64) -> PlayerId {
    PlayerId::new(raw).expect("test ids are non-zero")
}
