//! Signaling Relay
//!
//! Best-effort forwarding of peer negotiation messages. Payloads pass
//! through unchanged; the relay only decides who receives them.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::network::directory::ConnectionDirectory;
use crate::network::protocol::{ServerMessage, SignalingPayload};

/// Outcome of one forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Recipients the message was queued for.
    pub delivered: usize,
    /// Recipients the message was dropped for (unregistered, full or closed).
    pub dropped: usize,
}

/// Routes signaling payloads between registered identities.
pub struct SignalingRelay {
    directory: Arc<ConnectionDirectory>,
}

impl SignalingRelay {
    /// Create a relay over a directory.
    pub fn new(directory: Arc<ConnectionDirectory>) -> Self {
        Self { directory }
    }

    /// Forward a payload.
    ///
    /// With a target, only that identity's current channel receives it;
    /// an unregistered target drops it. Without a target, every registered
    /// identity except the sender receives it.
    pub async fn forward(&self, payload: SignalingPayload) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();

        let recipients = match payload.to {
            Some(target) => match self.directory.get(target).await {
                Some(channel) => vec![(target, channel)],
                None => {
                    debug!("Signaling {:?} from {} to {} dropped: not connected", payload.kind, payload.from, target);
                    outcome.dropped += 1;
                    return outcome;
                }
            },
            None => self.directory
                .snapshot()
                .await
                .into_iter()
                .filter(|(id, _)| *id != payload.from)
                .collect(),
        };

        for (id, channel) in recipients {
            match channel.try_deliver(ServerMessage::Signaling(payload.clone())) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!("Signaling from {} to {} not delivered: {}", payload.from, id, e);
                    outcome.dropped += 1;
                }
            }
        }

        debug!(
            "Signaling {:?} from {} relayed to {} recipient(s)",
            payload.kind, payload.from, outcome.delivered
        );
        outcome
    }
}
