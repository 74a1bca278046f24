//! WebSocket Voice Server
//!
//! Two independent accept loops:
//! - the ingest endpoint (loopback only) receives `all-maps` snapshots from
//!   the world simulation, installs them and triggers a broadcast cycle;
//! - the client endpoint accepts voice clients, binds their identity and
//!   relays signaling.
//!
//! Every accepted socket gets its own task. Client connections also get a
//! writer task that is the only thing ever writing to the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tracing::{info, warn, error, debug, instrument};

use crate::network::broadcaster::{BroadcastReport, ProximityBroadcaster};
use crate::network::channel::{ClientChannel, DEFAULT_QUEUE_CAPACITY};
use crate::network::directory::ConnectionDirectory;
use crate::network::protocol::{ServerMessage, UpstreamMessage};
use crate::network::relay::SignalingRelay;
use crate::network::session::ClientSession;
use crate::presence::proximity::{ProximityPolicy, RangeParseError, VisibilityRange};
use crate::presence::registry::PresenceRegistry;
use crate::presence::snapshot::{MapGroup, WorldSnapshot};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Ingest endpoint for the world feed. Must be a loopback address.
    pub ingest_addr: SocketAddr,
    /// Public client endpoint.
    pub client_addr: SocketAddr,
    /// Proximity policy for position updates.
    pub policy: ProximityPolicy,
    /// Per-connection outbound queue bound.
    pub queue_capacity: usize,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Time allowed for a client's WebSocket handshake.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ingest_addr: SocketAddr::from(([127, 0, 0, 1], 22141)),
            client_addr: SocketAddr::from(([0, 0, 0, 0], 22142)),
            policy: ProximityPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_connections: 1000,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Address could not be parsed.
    #[error("{var}: invalid socket address {value:?}")]
    InvalidAddr {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// Ingest endpoint is reachable from outside the host.
    #[error("ingest address {0} is not a loopback address")]
    IngestNotLoopback(SocketAddr),
    /// Unknown proximity policy name.
    #[error("PROXIMITY_POLICY: expected \"distance\" or \"same-map\", got {0:?}")]
    InvalidPolicy(String),
    /// Bad visibility range.
    #[error("PROXIMITY_RANGE: {0}")]
    InvalidRange(#[from] RangeParseError),
    /// Value is not a number or flag.
    #[error("{var}: invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

impl ServerConfig {
    /// Build configuration from environment variables, falling back to defaults.
    ///
    /// | variable | default |
    /// |---|---|
    /// | `MMO_SERVER_ADDR` | `127.0.0.1:22141` |
    /// | `PLAYER_SERVER_ADDR` | `0.0.0.0:22142` |
    /// | `PROXIMITY_POLICY` | `distance` |
    /// | `PROXIMITY_RANGE` | `normal` |
    /// | `PROXIMITY_INCLUDE_SELF` | `false` |
    /// | `CLIENT_QUEUE_CAPACITY` | `64` |
    /// | `MAX_CONNECTIONS` | `1000` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let addr = |var: &'static str, default: SocketAddr| -> Result<SocketAddr, ConfigError> {
            match lookup(var) {
                Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidAddr { var, value }),
                None => Ok(default),
            }
        };
        let number = |var: &'static str, default: usize| -> Result<usize, ConfigError> {
            match lookup(var) {
                Some(value) => match value.trim().parse::<usize>() {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(ConfigError::InvalidValue { var, value }),
                },
                None => Ok(default),
            }
        };

        let include_self = match lookup("PROXIMITY_INCLUDE_SELF") {
            None => false,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => return Err(ConfigError::InvalidValue { var: "PROXIMITY_INCLUDE_SELF", value }),
            },
        };

        let range = match lookup("PROXIMITY_RANGE") {
            Some(value) => value.parse::<VisibilityRange>()?,
            None => VisibilityRange::default(),
        };

        let policy = match lookup("PROXIMITY_POLICY").as_deref().map(str::trim) {
            None | Some("distance") => ProximityPolicy::Distance { range, include_self },
            Some("same-map") => ProximityPolicy::SameMap,
            Some(other) => return Err(ConfigError::InvalidPolicy(other.to_string())),
        };

        let config = Self {
            ingest_addr: addr("MMO_SERVER_ADDR", defaults.ingest_addr)?,
            client_addr: addr("PLAYER_SERVER_ADDR", defaults.client_addr)?,
            policy,
            queue_capacity: number("CLIENT_QUEUE_CAPACITY", defaults.queue_capacity)?,
            max_connections: number("MAX_CONNECTIONS", defaults.max_connections)?,
            handshake_timeout: defaults.handshake_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ingest_addr.ip().is_loopback() {
            return Err(ConfigError::IngestNotLoopback(self.ingest_addr));
        }
        Ok(())
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Voice server errors.
#[derive(Debug, Error)]
pub enum VoiceServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Shared services handed to every connection task.
#[derive(Clone)]
struct Services {
    registry: Arc<PresenceRegistry>,
    directory: Arc<ConnectionDirectory>,
    broadcaster: Arc<ProximityBroadcaster>,
    relay: Arc<SignalingRelay>,
    /// Accepted client sockets not yet cleaned up.
    active: Arc<AtomicUsize>,
}

/// The proximity voice server.
pub struct VoiceServer {
    /// Server configuration.
    config: ServerConfig,
    /// Registry, directory, broadcaster and relay.
    services: Services,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl VoiceServer {
    /// Create a new server with fresh registry and directory.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(PresenceRegistry::new());
        let directory = Arc::new(ConnectionDirectory::new());
        let broadcaster = Arc::new(ProximityBroadcaster::new(
            registry.clone(),
            directory.clone(),
            config.policy,
        ));
        let relay = Arc::new(SignalingRelay::new(directory.clone()));

        Self {
            config,
            services: Services {
                registry,
                directory,
                broadcaster,
                relay,
                active: Arc::new(AtomicUsize::new(0)),
            },
            shutdown_tx,
        }
    }

    /// Presence registry.
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.services.registry
    }

    /// Connection directory.
    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.services.directory
    }

    /// Bind both endpoints from the configuration and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), VoiceServerError> {
        self.config.validate()?;
        let ingest = TcpListener::bind(&self.config.ingest_addr).await?;
        let client = TcpListener::bind(&self.config.client_addr).await?;
        self.serve(ingest, client).await
    }

    /// Serve on already bound listeners until shutdown.
    pub async fn serve(&self, ingest: TcpListener, client: TcpListener) -> Result<(), VoiceServerError> {
        info!("Ingest endpoint listening on {}", ingest.local_addr()?);
        info!("Client endpoint listening on {}", client.local_addr()?);
        info!("Proximity policy: {}", self.config.policy);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = ingest.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("Upstream feed connected from {}", addr);
                            self.handle_upstream(stream, addr);
                        }
                        Err(e) => error!("Ingest accept error: {}", e),
                    }
                }
                result = client.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.services.active.load(Ordering::Acquire) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New client connection from {}", addr);
                            self.handle_client(stream, addr);
                        }
                        Err(e) => error!("Client accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle one upstream feed connection.
    fn handle_upstream(&self, stream: TcpStream, addr: SocketAddr) {
        let services = self.services.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("Upstream handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            loop {
                tokio::select! {
                    msg = ws.next() => {
                        let bytes = match msg {
                            Some(Ok(Message::Text(text))) => text.into_bytes(),
                            Some(Ok(Message::Binary(data))) => data,
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                warn!("Upstream read error from {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        match UpstreamMessage::from_slice(&bytes) {
                            Ok(UpstreamMessage::AllMaps(payload)) => {
                                let report = ingest_snapshot(&services, payload.data).await;
                                debug!("Snapshot {} broadcast: {:?}", report.generation, report);
                            }
                            Err(e) => warn!("Upstream frame from {} dropped: {}", addr, e),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            // The last snapshot stays authoritative until a feed reconnects.
            info!("Upstream feed {} disconnected", addr);
        });
    }

    /// Handle one client connection.
    fn handle_client(&self, stream: TcpStream, addr: SocketAddr) {
        let services = self.services.clone();
        let queue_capacity = self.config.queue_capacity;
        let handshake_timeout = self.config.handshake_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        services.active.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            let _slot = ActiveSlot(services.active.clone());
            let ws_stream = match tokio::time::timeout(handshake_timeout, accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!("WebSocket handshake timed out for {}", addr);
                    return;
                }
            };

            let (ws_sender, mut ws_receiver) = ws_stream.split();
            let (channel, msg_rx) = ClientChannel::new(queue_capacity);
            let mut session = ClientSession::new(
                channel,
                services.directory.clone(),
                services.relay.clone(),
            );

            let sender_task = tokio::spawn(run_writer(ws_sender, msg_rx));

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                session.handle_frame(text.as_bytes()).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                session.handle_frame(&data).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            session.close().await;
            sender_task.abort();
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active registered identity count.
    pub async fn connection_count(&self) -> usize {
        self.services.directory.len().await
    }

    /// Client sockets currently held open, bound or not.
    pub fn active_connections(&self) -> usize {
        self.services.active.load(Ordering::Acquire)
    }
}

/// Releases a connection slot when the client task ends, however it ends.
struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Install a snapshot built from upstream map groups, then broadcast it.
async fn ingest_snapshot(services: &Services, groups: Vec<MapGroup>) -> BroadcastReport {
    let (snapshot, summary) = WorldSnapshot::build(groups);
    if summary.duplicates > 0 || summary.relabeled > 0 {
        warn!(
            "Snapshot had {} duplicate and {} mislabeled player entries",
            summary.duplicates, summary.relabeled
        );
    }

    let generation = services.registry.replace_snapshot(snapshot).await;
    debug!(
        "Installed snapshot {}: {} players on {} maps",
        generation, summary.players, summary.maps
    );

    services.broadcaster.recompute().await
}

/// Drain a client's outbound queue into its socket. Sole writer for the socket.
///
/// Pings are answered by tungstenite itself while the read half is polled.
async fn run_writer(
    mut ws_sender: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut msg_rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = msg_rx.recv().await {
        let text = match msg.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                continue;
            }
        };

        if ws_sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = ws_sender.close().await;
}
