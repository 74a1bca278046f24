//! World Snapshots
//!
//! A snapshot is the complete set of players across all maps at one
//! ingest instant. It is built once from the upstream map groups and is
//! immutable afterwards; the registry swaps whole snapshots, never patches.

use std::collections::{HashMap, HashSet};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::player::{Player, PlayerId, MapId};

/// One map's worth of players as sent by the upstream feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapGroup {
    /// Map identifier.
    pub map_id: MapId,
    /// Players currently on this map.
    #[serde(default)]
    pub players: Vec<Player>,
}

impl MapGroup {
    /// Create a map group.
    pub fn new(map_id: MapId, players: Vec<Player>) -> Self {
        Self { map_id, players }
    }
}

/// What the builder did while indexing a set of map groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Distinct maps in the snapshot (including empty ones).
    pub maps: usize,
    /// Distinct players in the snapshot.
    pub players: usize,
    /// Player entries discarded because a later entry had the same identity.
    pub duplicates: usize,
    /// Players whose `mapId` field disagreed with their group and was rewritten.
    pub relabeled: usize,
}

/// Indexed, immutable world snapshot.
#[derive(Clone, Debug)]
pub struct WorldSnapshot {
    /// Install order assigned by the registry (0 = never installed).
    generation: u64,
    /// When the snapshot was built.
    received_at: DateTime<Utc>,
    /// Players grouped by map, in order of first appearance.
    maps: HashMap<MapId, Vec<Player>>,
    /// Identity -> (map, index into that map's players).
    index: HashMap<PlayerId, (MapId, usize)>,
}

impl WorldSnapshot {
    /// The snapshot that exists before the first upstream update.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            received_at: Utc::now(),
            maps: HashMap::new(),
            index: HashMap::new(),
        }
    }

    /// Build a snapshot from upstream map groups.
    ///
    /// Identities are unique across the whole snapshot: when the same
    /// identity appears more than once, the last occurrence wins and the
    /// player is placed only in that occurrence's map. Repeated map ids are
    /// merged. Each player's `map_id` is normalized to its group.
    pub fn build(groups: Vec<MapGroup>) -> (Self, BuildSummary) {
        SnapshotBuilder::new().extend(groups).finish()
    }

    /// Install order (assigned by the registry).
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// When this snapshot was built.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Look up a player by identity.
    pub fn find_player(&self, id: PlayerId) -> Option<&Player> {
        let (map_id, slot) = self.index.get(&id)?;
        self.maps.get(map_id).and_then(|players| players.get(*slot))
    }

    /// Players on a map. `None` if the map is not part of this snapshot.
    pub fn players_in_map(&self, map_id: MapId) -> Option<&[Player]> {
        self.maps.get(&map_id).map(Vec::as_slice)
    }

    /// Map ids present in this snapshot.
    pub fn map_ids(&self) -> impl Iterator<Item = MapId> + '_ {
        self.maps.keys().copied()
    }

    /// Number of maps.
    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.index.len()
    }
}

impl Default for WorldSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Incremental builder for [`WorldSnapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    /// Maps in order of first appearance.
    map_order: Vec<MapId>,
    /// Maps already in `map_order`.
    seen_maps: HashSet<MapId>,
    /// Latest entry per identity.
    latest: HashMap<PlayerId, Player>,
    /// Identities in order of first appearance.
    player_order: Vec<PlayerId>,
    duplicates: usize,
    relabeled: usize,
}

impl SnapshotBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one map group.
    pub fn add_group(&mut self, group: MapGroup) -> &mut Self {
        if self.seen_maps.insert(group.map_id) {
            self.map_order.push(group.map_id);
        }

        for mut player in group.players {
            if player.map_id != group.map_id {
                player.map_id = group.map_id;
                self.relabeled += 1;
            }

            let id = player.guid;
            if self.latest.insert(id, player).is_some() {
                self.duplicates += 1;
            } else {
                self.player_order.push(id);
            }
        }
        self
    }

    /// Add many map groups.
    pub fn extend(mut self, groups: impl IntoIterator<Item = MapGroup>) -> Self {
        for group in groups {
            self.add_group(group);
        }
        self
    }

    /// Index everything added so far.
    pub fn finish(mut self) -> (WorldSnapshot, BuildSummary) {
        let mut maps: HashMap<MapId, Vec<Player>> = self.map_order
            .iter()
            .map(|id| (*id, Vec::new()))
            .collect();
        let mut index = HashMap::with_capacity(self.latest.len());

        for id in &self.player_order {
            let Some(player) = self.latest.remove(id) else {
                continue;
            };
            let map_id = player.map_id;
            let players = maps.entry(map_id).or_default();
            index.insert(*id, (map_id, players.len()));
            players.push(player);
        }

        let summary = BuildSummary {
            maps: maps.len(),
            players: index.len(),
            duplicates: self.duplicates,
            relabeled: self.relabeled,
        };

        let snapshot = WorldSnapshot {
            generation: 0,
            received_at: Utc::now(),
            maps,
            index,
        };

        (snapshot, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::player::test_id;
    use crate::core::position::Position;
    use proptest::prelude::*;

    fn player(id: u64, map_id: MapId, x: f64, y: f64) -> Player {
        Player::new(test_id(id), format!("p{}", id), map_id, Position::planar(x, y))
    }

    #[test]
    fn test_build_indexes_by_map_and_id() {
        let (snapshot, summary) = WorldSnapshot::build(vec![
            MapGroup::new(0, vec![player(1, 0, 0.0, 0.0), player(2, 0, 5.0, 5.0)]),
            MapGroup::new(1, vec![player(3, 1, 1.0, 1.0)]),
        ]);

        assert_eq!(summary.maps, 2);
        assert_eq!(summary.players, 3);
        assert_eq!(snapshot.players_in_map(0).map(<[Player]>::len), Some(2));
        assert_eq!(snapshot.find_player(test_id(3)).map(|p| p.map_id), Some(1));
    }

    #[test]
    fn test_empty_map_is_present() {
        let (snapshot, _) = WorldSnapshot::build(vec![MapGroup::new(530, vec![])]);

        assert_eq!(snapshot.players_in_map(530), Some(&[][..]));
        assert!(snapshot.players_in_map(571).is_none());
    }

    #[test]
    fn test_duplicate_identity_last_wins_across_maps() {
        let (snapshot, summary) = WorldSnapshot::build(vec![
            MapGroup::new(0, vec![player(1, 0, 0.0, 0.0), player(2, 0, 1.0, 1.0)]),
            MapGroup::new(1, vec![player(1, 1, 9.0, 9.0)]),
        ]);

        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.players, 2);

        let moved = snapshot.find_player(test_id(1)).unwrap();
        assert_eq!(moved.map_id, 1);
        assert_eq!(moved.position.x, 9.0);

        let map0 = snapshot.players_in_map(0).unwrap();
        assert!(map0.iter().all(|p| p.guid != test_id(1)));
    }

    #[test]
    fn test_map_id_normalized_to_group() {
        let (snapshot, summary) = WorldSnapshot::build(vec![
            MapGroup::new(1, vec![player(4, 99, 0.0, 0.0)]),
        ]);

        assert_eq!(summary.relabeled, 1);
        assert_eq!(snapshot.find_player(test_id(4)).unwrap().map_id, 1);
        assert!(snapshot.players_in_map(99).is_none());
    }

    #[test]
    fn test_repeated_map_groups_merge() {
        let (snapshot, summary) = WorldSnapshot::build(vec![
            MapGroup::new(1, vec![player(1, 1, 0.0, 0.0)]),
            MapGroup::new(1, vec![player(2, 1, 0.0, 0.0)]),
        ]);

        assert_eq!(summary.maps, 1);
        assert_eq!(snapshot.players_in_map(1).unwrap().len(), 2);
    }

    #[test]
    fn test_many_maps_keep_first_seen_order() {
        let mut builder = SnapshotBuilder::new();
        for map in (0..500u32).chain(0..500u32) {
            builder.add_group(MapGroup::new(map, vec![player(1 + map as u64, map, 0.0, 0.0)]));
        }
        let (snapshot, summary) = builder.finish();

        assert_eq!(summary.maps, 500);
        assert_eq!(summary.duplicates, 500);
        assert_eq!(snapshot.map_count(), 500);
        assert_eq!(snapshot.players_in_map(499).map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_map_group_players_default_to_empty() {
        let group: MapGroup = serde_json::from_str(r#"{ "mapId": 7 }"#).unwrap();
        assert_eq!(group.map_id, 7);
        assert!(group.players.is_empty());
    }

    proptest! {
        #[test]
        fn prop_every_player_found_in_its_map(
            entries in prop::collection::vec((1u64..40, 0u32..4, -500.0f64..500.0, -500.0f64..500.0), 0..60)
        ) {
            let groups: Vec<MapGroup> = entries
                .iter()
                .map(|(id, map, x, y)| MapGroup::new(*map, vec![player(*id, *map, *x, *y)]))
                .collect();
            let (snapshot, summary) = WorldSnapshot::build(groups);

            prop_assert_eq!(summary.players + summary.duplicates, entries.len());

            for (id, _, _, _) in &entries {
                let found = snapshot.find_player(test_id(*id)).unwrap();
                let map = snapshot.players_in_map(found.map_id).unwrap();
                prop_assert_eq!(map.iter().filter(|p| p.guid == found.guid).count(), 1);
            }

            let total: usize = snapshot.map_ids()
                .map(|m| snapshot.players_in_map(m).unwrap().len())
                .sum();
            prop_assert_eq!(total, snapshot.player_count());
        }
    }
}
