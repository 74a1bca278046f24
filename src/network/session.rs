//! Client Sessions
//!
//! Per-connection state machine shared by the socket read loop:
//!
//! ```text
//! Connecting --connect--> Open(id) --close--> Closed
//!     |                     |  ^
//!     |                     +--+ connect (rebind)
//!     +-------------close-------------------> Closed
//! ```
//!
//! The session owns the connection's outbound channel and is the only
//! place that registers or unregisters it in the directory. Leaving `Open`
//! unregisters exactly once, whichever path gets there first.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::player::PlayerId;
use crate::network::channel::{ClientChannel, ConnectionId};
use crate::network::directory::ConnectionDirectory;
use crate::network::protocol::{ClientMessage, ConnectPayload, SignalingPayload};
use crate::network::relay::{RelayOutcome, SignalingRelay};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, no identity bound yet.
    Connecting,
    /// Identity bound and registered in the directory.
    Open(PlayerId),
    /// Read loop finished; nothing registered.
    Closed,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Identity bound (or rebound).
    Bound(PlayerId),
    /// Signaling handed to the relay.
    Relayed(RelayOutcome),
    /// Frame dropped: undecodable, unexpected in this state, or session closed.
    Ignored,
}

/// State machine for one client connection.
pub struct ClientSession {
    channel: ClientChannel,
    state: ConnectionState,
    directory: Arc<ConnectionDirectory>,
    relay: Arc<SignalingRelay>,
}

impl ClientSession {
    /// Create a session in the `Connecting` state.
    pub fn new(
        channel: ClientChannel,
        directory: Arc<ConnectionDirectory>,
        relay: Arc<SignalingRelay>,
    ) -> Self {
        Self {
            channel,
            state: ConnectionState::Connecting,
            directory,
            relay,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity bound to this connection, if open.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self.state {
            ConnectionState::Open(id) => Some(id),
            _ => None,
        }
    }

    /// Connection id of the owned channel.
    pub fn connection_id(&self) -> ConnectionId {
        self.channel.id()
    }

    /// Decode and dispatch a raw frame. Decode errors are logged, never fatal.
    pub async fn handle_frame(&mut self, bytes: &[u8]) -> Dispatch {
        match ClientMessage::from_slice(bytes) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                warn!("Connection {}: dropping frame: {}", self.connection_id(), e);
                Dispatch::Ignored
            }
        }
    }

    /// Dispatch a decoded message according to the current state.
    pub async fn handle_message(&mut self, msg: ClientMessage) -> Dispatch {
        match (self.state, msg) {
            (ConnectionState::Closed, _) => Dispatch::Ignored,
            (_, ClientMessage::Connect(payload)) => self.bind(payload).await,
            (ConnectionState::Open(bound), ClientMessage::Signaling(payload)) => {
                self.relay_signal(bound, payload).await
            }
            (ConnectionState::Connecting, ClientMessage::Signaling(_)) => {
                debug!("Connection {}: signaling before connect ignored", self.connection_id());
                Dispatch::Ignored
            }
        }
    }

    async fn bind(&mut self, payload: ConnectPayload) -> Dispatch {
        let id = payload.guid;

        if let ConnectionState::Open(previous) = self.state {
            if previous != id {
                self.directory.unregister(previous, self.channel.id()).await;
                info!("Connection {}: rebinding player {} -> {}", self.connection_id(), previous, id);
            }
        }

        if let Some(old) = self.directory.register(id, self.channel.clone()).await {
            if !old.same_connection(&self.channel) {
                info!("Player {} reconnected, connection {} superseded", id, old.id());
            }
        }

        self.state = ConnectionState::Open(id);
        info!("Player {} connected on connection {}", id, self.connection_id());
        Dispatch::Bound(id)
    }

    async fn relay_signal(&self, bound: PlayerId, payload: SignalingPayload) -> Dispatch {
        if payload.from != bound {
            debug!(
                "Connection {}: signaling claims sender {} but is bound to {}",
                self.connection_id(), payload.from, bound
            );
        }
        Dispatch::Relayed(self.relay.forward(payload).await)
    }

    /// Move to `Closed`, unregistering if an identity was bound.
    ///
    /// Returns whether this call performed the unregister. Later calls are no-ops.
    pub async fn close(&mut self) -> bool {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Closed);
        match previous {
            ConnectionState::Open(id) => {
                self.directory.unregister(id, self.channel.id()).await;
                info!("Player {} disconnected from connection {}", id, self.connection_id());
                true
            }
            _ => false,
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        // A read loop aborted before `close` still has to leave the directory.
        if let ConnectionState::Open(id) = self.state {
            let directory = self.directory.clone();
            let connection = self.channel.id();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    directory.unregister(id, connection).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use crate::core::player::test_id;
    use crate::network::protocol::{ServerMessage, SignalKind};

    struct Fixture {
        directory: Arc<ConnectionDirectory>,
        relay: Arc<SignalingRelay>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(ConnectionDirectory::new());
        let relay = Arc::new(SignalingRelay::new(directory.clone()));
        Fixture { directory, relay }
    }

    fn session(f: &Fixture) -> (ClientSession, mpsc::Receiver<ServerMessage>) {
        let (channel, rx) = ClientChannel::new(8);
        (ClientSession::new(channel, f.directory.clone(), f.relay.clone()), rx)
    }

    fn connect_frame(id: u64) -> String {
        format!(r#"{{ "type": "connect", "payload": {{ "guid": {}, "secret": "s" }} }}"#, id)
    }

    fn signal_frame(from: u64, to: u64) -> String {
        format!(
            r#"{{ "type": "signaling", "payload": {{ "from": {}, "to": {}, "type": "offer", "data": "sdp" }} }}"#,
            from, to
        )
    }

    #[tokio::test]
    async fn test_connect_opens_and_registers() {
        let f = fixture();
        let (mut s, _rx) = session(&f);
        assert_eq!(s.state(), ConnectionState::Connecting);

        let dispatch = s.handle_frame(connect_frame(5).as_bytes()).await;

        assert_eq!(dispatch, Dispatch::Bound(test_id(5)));
        assert_eq!(s.state(), ConnectionState::Open(test_id(5)));
        assert_eq!(f.directory.get(test_id(5)).await.map(|c| c.id()), Some(s.connection_id()));
    }

    #[tokio::test]
    async fn test_garbage_frames_keep_session_alive() {
        let f = fixture();
        let (mut s, _rx) = session(&f);
        s.handle_frame(connect_frame(5).as_bytes()).await;

        assert_eq!(s.handle_frame(b"{{{").await, Dispatch::Ignored);
        assert_eq!(s.handle_frame(br#"{ "type": "hello", "payload": {} }"#).await, Dispatch::Ignored);
        assert_eq!(s.state(), ConnectionState::Open(test_id(5)));
    }

    #[tokio::test]
    async fn test_signaling_before_connect_ignored() {
        let f = fixture();
        let (mut target, mut target_rx) = session(&f);
        target.handle_frame(connect_frame(2).as_bytes()).await;
        let (mut s, _rx) = session(&f);

        assert_eq!(s.handle_frame(signal_frame(1, 2).as_bytes()).await, Dispatch::Ignored);
        assert!(target_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signaling_relayed_when_open() {
        let f = fixture();
        let (mut a, _a_rx) = session(&f);
        let (mut b, mut b_rx) = session(&f);
        a.handle_frame(connect_frame(1).as_bytes()).await;
        b.handle_frame(connect_frame(2).as_bytes()).await;

        let dispatch = a.handle_frame(signal_frame(1, 2).as_bytes()).await;

        assert_eq!(dispatch, Dispatch::Relayed(RelayOutcome { delivered: 1, dropped: 0 }));
        match b_rx.try_recv().unwrap() {
            ServerMessage::Signaling(payload) => {
                assert_eq!(payload.from, test_id(1));
                assert_eq!(payload.kind, SignalKind::Offer);
                assert_eq!(payload.data, "sdp");
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_unregisters_exactly_once() {
        let f = fixture();
        let (mut s, _rx) = session(&f);
        s.handle_frame(connect_frame(3).as_bytes()).await;

        assert!(s.close().await);
        assert!(!s.close().await);
        assert_eq!(s.state(), ConnectionState::Closed);
        assert!(f.directory.get(test_id(3)).await.is_none());
        assert_eq!(s.handle_frame(connect_frame(3).as_bytes()).await, Dispatch::Ignored);
    }

    #[tokio::test]
    async fn test_close_without_identity() {
        let f = fixture();
        let (mut s, _rx) = session(&f);

        assert!(!s.close().await);
        assert_eq!(s.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_superseded_session_close_keeps_newer() {
        let f = fixture();
        let (mut old, _old_rx) = session(&f);
        let (mut new, _new_rx) = session(&f);
        old.handle_frame(connect_frame(7).as_bytes()).await;
        new.handle_frame(connect_frame(7).as_bytes()).await;

        old.close().await;

        assert_eq!(f.directory.get(test_id(7)).await.map(|c| c.id()), Some(new.connection_id()));
    }

    #[tokio::test]
    async fn test_rebind_moves_registration() {
        let f = fixture();
        let (mut s, _rx) = session(&f);
        s.handle_frame(connect_frame(1).as_bytes()).await;
        s.handle_frame(connect_frame(2).as_bytes()).await;

        assert_eq!(s.player_id(), Some(test_id(2)));
        assert!(f.directory.get(test_id(1)).await.is_none());
        assert!(f.directory.get(test_id(2)).await.is_some());
    }

    #[tokio::test]
    async fn test_drop_without_close_unregisters() {
        let f = fixture();
        let (mut s, _rx) = session(&f);
        s.handle_frame(connect_frame(4).as_bytes()).await;
        drop(s);

        for _ in 0..10 {
            if f.directory.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(f.directory.is_empty().await);
    }
}
