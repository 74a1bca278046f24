//! Proximity Broadcaster
//!
//! After a snapshot is installed, builds one personalized position update
//! per connected client and queues it on that client's channel.
//!
//! Lock discipline: the registry and the directory are each read once and
//! released before any delivery starts. Cycles are serialized by a guard
//! that remembers the last delivered generation, so no client ever gets an
//! update from an older snapshot after one from a newer snapshot.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn, instrument};

use crate::network::directory::ConnectionDirectory;
use crate::network::protocol::{PositionPayload, ServerMessage};
use crate::presence::proximity::ProximityPolicy;
use crate::presence::registry::PresenceRegistry;
use crate::presence::snapshot::WorldSnapshot;

/// Outcome of one broadcast cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Generation of the snapshot the cycle was computed from.
    pub generation: u64,
    /// Updates queued successfully.
    pub delivered: usize,
    /// Clients skipped because they are unknown to the snapshot.
    pub skipped: usize,
    /// Updates dropped because the client queue was full or closed.
    pub failed: usize,
    /// The cycle was abandoned because a newer snapshot was already delivered.
    pub stale: bool,
}

/// Computes and pushes per-client proximity updates.
pub struct ProximityBroadcaster {
    registry: Arc<PresenceRegistry>,
    directory: Arc<ConnectionDirectory>,
    policy: ProximityPolicy,
    /// Last delivered generation; held for the whole cycle.
    cycle: Mutex<u64>,
}

impl ProximityBroadcaster {
    /// Create a broadcaster over a registry and a directory.
    pub fn new(
        registry: Arc<PresenceRegistry>,
        directory: Arc<ConnectionDirectory>,
        policy: ProximityPolicy,
    ) -> Self {
        Self {
            registry,
            directory,
            policy,
            cycle: Mutex::new(0),
        }
    }

    /// Policy used for every cycle.
    pub fn policy(&self) -> &ProximityPolicy {
        &self.policy
    }

    /// Run a cycle against the currently installed snapshot.
    pub async fn recompute(&self) -> BroadcastReport {
        let mut last = self.cycle.lock().await;
        let snapshot = self.registry.current().await;
        self.run_cycle(&mut last, snapshot).await
    }

    /// Run a cycle against a specific snapshot.
    ///
    /// Abandoned without sending anything if a newer generation has already
    /// been delivered.
    pub async fn recompute_with(&self, snapshot: Arc<WorldSnapshot>) -> BroadcastReport {
        let mut last = self.cycle.lock().await;
        self.run_cycle(&mut last, snapshot).await
    }

    #[instrument(skip_all, fields(generation = snapshot.generation()))]
    async fn run_cycle(&self, last: &mut u64, snapshot: Arc<WorldSnapshot>) -> BroadcastReport {
        let mut report = BroadcastReport {
            generation: snapshot.generation(),
            ..Default::default()
        };

        if snapshot.generation() < *last {
            debug!("Skipping stale cycle, generation {} already delivered", *last);
            report.stale = true;
            return report;
        }

        let recipients = self.directory.snapshot().await;

        for (id, channel) in recipients {
            let set = match self.policy.visible_set(&snapshot, id) {
                Ok(set) => set,
                Err(e) => {
                    debug!("Skipping player {}: {}", id, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let msg = ServerMessage::Position(PositionPayload::from_visible(set, &self.policy));
            match channel.try_deliver(msg) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Position update for player {} not delivered: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        *last = snapshot.generation();
        debug!(
            "Broadcast cycle done: {} delivered, {} skipped, {} failed",
            report.delivered, report.skipped, report.failed
        );
        report
    }
}
