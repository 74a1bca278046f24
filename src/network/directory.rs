//! Connection Directory
//!
//! Maps a player identity to the channel of its live connection.
//! Last connect wins. Removal is keyed by identity *and* connection, so a
//! superseded connection cleaning up can never evict its replacement.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::player::PlayerId;
use crate::network::channel::{ClientChannel, ConnectionId};

/// Identity -> live outbound channel.
pub struct ConnectionDirectory {
    entries: RwLock<HashMap<PlayerId, ClientChannel>>,
}

impl ConnectionDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store the channel for `id`, returning the superseded one if any.
    ///
    /// The superseded channel is not closed; its connection keeps running
    /// until its own read loop ends.
    pub async fn register(&self, id: PlayerId, channel: ClientChannel) -> Option<ClientChannel> {
        let connection = channel.id();
        let previous = self.entries.write().await.insert(id, channel);

        match &previous {
            Some(old) if old.id() != connection => {
                debug!("Player {} re-registered: connection {} supersedes {}", id, connection, old.id());
            }
            _ => debug!("Player {} registered on connection {}", id, connection),
        }

        previous
    }

    /// Remove `id` if it is still registered to `connection`.
    ///
    /// Returns whether an entry was removed. Unknown identities and
    /// entries owned by another connection are left alone.
    pub async fn unregister(&self, id: PlayerId, connection: ConnectionId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&id) {
            Some(current) if current.id() == connection => {
                entries.remove(&id);
                true
            }
            Some(current) => {
                debug!(
                    "Player {} unregister from connection {} ignored, now owned by {}",
                    id, connection, current.id()
                );
                false
            }
            None => false,
        }
    }

    /// Channel currently registered for `id`.
    pub async fn get(&self, id: PlayerId) -> Option<ClientChannel> {
        self.entries.read().await.get(&id).cloned()
    }

    /// Point-in-time copy of every entry, for iteration without the lock.
    pub async fn snapshot(&self) -> Vec<(PlayerId, ClientChannel)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, channel)| (*id, channel.clone()))
            .collect()
    }

    /// Number of registered identities.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no identity is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for ConnectionDirectory {
    fn default() -> Self {
        Self::new()
    }
}
