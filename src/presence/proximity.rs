//! Proximity Rules
//!
//! Decides which players on a map are visible to a given player.
//! Two policies exist: everyone on the same map, or everyone within a
//! planar distance. The choice is made once in configuration.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::player::{Player, PlayerId, MapId};
use crate::presence::registry::PresenceError;
use crate::presence::snapshot::WorldSnapshot;

// =============================================================================
// VISIBILITY RANGE
// =============================================================================

/// Visibility distances used by the world simulation, plus custom values.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum VisibilityRange {
    /// 25 units.
    Tiny,
    /// 50 units.
    Small,
    /// 100 units (the simulation's default).
    #[default]
    Normal,
    /// 200 units.
    Large,
    /// 400 units.
    Gigantic,
    /// 533 units.
    Infinite,
    /// Any positive finite distance. Built with [`VisibilityRange::custom`].
    Custom(CustomRange),
}

/// Validated custom distance: always positive and finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomRange(f64);

impl CustomRange {
    /// Distance in world units.
    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl VisibilityRange {
    /// Distance in world units.
    pub fn distance(self) -> f64 {
        match self {
            VisibilityRange::Tiny => 25.0,
            VisibilityRange::Small => 50.0,
            VisibilityRange::Normal => 100.0,
            VisibilityRange::Large => 200.0,
            VisibilityRange::Gigantic => 400.0,
            VisibilityRange::Infinite => 533.0,
            VisibilityRange::Custom(d) => d.get(),
        }
    }

    /// Custom range, rejecting non-positive and non-finite distances.
    pub fn custom(distance: f64) -> Result<Self, RangeParseError> {
        if distance.is_finite() && distance > 0.0 {
            Ok(VisibilityRange::Custom(CustomRange(distance)))
        } else {
            Err(RangeParseError::OutOfRange(distance))
        }
    }
}

impl fmt::Display for VisibilityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisibilityRange::Custom(d) => write!(f, "{}", d.get()),
            named => write!(f, "{:?} ({})", named, named.distance()),
        }
    }
}

/// Errors parsing a [`VisibilityRange`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeParseError {
    /// Neither a known name nor a number.
    #[error("unknown visibility range: {0}")]
    Unknown(String),
    /// Number is not a positive finite distance.
    #[error("visibility range must be positive and finite, got {0}")]
    OutOfRange(f64),
}

impl FromStr for VisibilityRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiny" => Ok(VisibilityRange::Tiny),
            "small" => Ok(VisibilityRange::Small),
            "normal" => Ok(VisibilityRange::Normal),
            "large" => Ok(VisibilityRange::Large),
            "gigantic" => Ok(VisibilityRange::Gigantic),
            "infinite" => Ok(VisibilityRange::Infinite),
            other => other
                .parse::<f64>()
                .map_err(|_| RangeParseError::Unknown(s.to_string()))
                .and_then(VisibilityRange::custom),
        }
    }
}

// =============================================================================
// POLICY
// =============================================================================

/// Rule used to build a client's personalized update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProximityPolicy {
    /// Every other player on the same map.
    SameMap,
    /// Players on the same map within `range` on the (x, y) plane.
    Distance {
        /// Maximum planar distance (inclusive).
        range: VisibilityRange,
        /// Whether the requesting player appears in its own nearby set.
        include_self: bool,
    },
}

impl Default for ProximityPolicy {
    fn default() -> Self {
        ProximityPolicy::Distance {
            range: VisibilityRange::Normal,
            include_self: false,
        }
    }
}

impl fmt::Display for ProximityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProximityPolicy::SameMap => write!(f, "same-map"),
            ProximityPolicy::Distance { range, include_self } => {
                write!(f, "distance(range={}, include_self={})", range, include_self)
            }
        }
    }
}

/// Result of evaluating a policy for one player.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleSet {
    /// The requesting player's own record.
    pub player: Player,
    /// Map both the player and the visible set belong to.
    pub map_id: MapId,
    /// Players visible to `player`.
    pub visible: Vec<Player>,
}

impl ProximityPolicy {
    /// Filter a map's players down to those visible to `me`.
    pub fn filter(&self, me: &Player, map_players: &[Player]) -> Vec<Player> {
        match *self {
            ProximityPolicy::SameMap => map_players
                .iter()
                .filter(|p| p.guid != me.guid)
                .cloned()
                .collect(),
            ProximityPolicy::Distance { range, include_self } => {
                let limit = range.distance();
                map_players
                    .iter()
                    .filter(|p| if p.guid == me.guid {
                        include_self
                    } else {
                        me.position.is_within(&p.position, limit)
                    })
                    .cloned()
                    .collect()
            }
        }
    }

    /// Evaluate the policy for `id` against one snapshot.
    pub fn visible_set(&self, snapshot: &WorldSnapshot, id: PlayerId) -> Result<VisibleSet, PresenceError> {
        let me = snapshot.find_player(id)
            .ok_or(PresenceError::PlayerNotFound(id))?;
        let map_players = snapshot.players_in_map(me.map_id)
            .ok_or(PresenceError::MapNotFound(me.map_id))?;

        Ok(VisibleSet {
            player: me.clone(),
            map_id: me.map_id,
            visible: self.filter(me, map_players),
        })
    }
}
