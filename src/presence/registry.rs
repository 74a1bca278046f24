//! Presence Registry
//!
//! Holds the latest [`WorldSnapshot`] behind a reader/writer lock.
//! Readers take an `Arc` to the whole snapshot, so every answer comes from
//! exactly one ingest tick. Replacing a snapshot never triggers broadcasting;
//! callers decide when to recompute.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::player::{Player, PlayerId, MapId};
use crate::presence::snapshot::WorldSnapshot;

/// Registry lookup errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PresenceError {
    /// Player is not part of the current snapshot.
    #[error("player {0} not found")]
    PlayerNotFound(PlayerId),
    /// Map is not part of the current snapshot.
    #[error("map {0} not found")]
    MapNotFound(MapId),
}

/// Counters describing the installed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Generation of the installed snapshot.
    pub generation: u64,
    /// Number of maps.
    pub maps: usize,
    /// Number of players.
    pub players: usize,
}

/// Canonical in-memory index of player presence.
pub struct PresenceRegistry {
    current: RwLock<Arc<WorldSnapshot>>,
}

impl PresenceRegistry {
    /// Create a registry holding the empty snapshot.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(WorldSnapshot::empty())),
        }
    }

    /// Install a new snapshot, discarding the previous one entirely.
    ///
    /// Returns the generation assigned to the installed snapshot.
    pub async fn replace_snapshot(&self, mut snapshot: WorldSnapshot) -> u64 {
        let mut current = self.current.write().await;
        let generation = current.generation() + 1;
        snapshot.set_generation(generation);
        *current = Arc::new(snapshot);
        generation
    }

    /// The installed snapshot.
    pub async fn current(&self) -> Arc<WorldSnapshot> {
        self.current.read().await.clone()
    }

    /// Look up a player by identity.
    pub async fn find_player(&self, id: PlayerId) -> Result<Player, PresenceError> {
        let current = self.current.read().await;
        current.find_player(id)
            .cloned()
            .ok_or(PresenceError::PlayerNotFound(id))
    }

    /// Players on a map. An unknown map is an error; a known empty map is not.
    pub async fn players_in_map(&self, map_id: MapId) -> Result<Vec<Player>, PresenceError> {
        let current = self.current.read().await;
        current.players_in_map(map_id)
            .map(<[Player]>::to_vec)
            .ok_or(PresenceError::MapNotFound(map_id))
    }

    /// Counters for the installed snapshot.
    pub async fn stats(&self) -> RegistryStats {
        let current = self.current.read().await;
        RegistryStats {
            generation: current.generation(),
            maps: current.map_count(),
            players: current.player_count(),
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
