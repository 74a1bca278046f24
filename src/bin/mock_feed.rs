//! Mock World Feed
//!
//! Stands in for the world simulation during local testing: connects to the
//! ingest endpoint and pushes an `all-maps` snapshot every second with a few
//! players wandering around.
//!
//! `MMO_SERVER_ADDR` selects the ingest endpoint, `MOCK_PLAYERS` the number
//! of simulated players (default 2).

use std::time::Duration;
use anyhow::Context;
use futures_util::SinkExt;
use rand::Rng;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use proximity_voice::{
    network::protocol::{AllMapsPayload, UpstreamMessage},
    presence::snapshot::MapGroup,
    MapId, Player, PlayerId, Position, VERSION,
};

const MAP_ID: MapId = 1;
const TICK: Duration = Duration::from_secs(1);

struct Walker {
    player: Player,
    speed: f64,
}

impl Walker {
    fn step(&mut self, rng: &mut impl Rng) {
        let position = &mut self.player.position;
        position.x += (rng.gen::<f64>() - 0.5) * self.speed;
        position.y += (rng.gen::<f64>() - 0.5) * self.speed;
        position.o = rng.gen_range(0.0..std::f64::consts::TAU);
    }
}

fn spawn_walkers(count: u64) -> Vec<Walker> {
    (1..=count)
        .filter_map(|n| {
            let id = PlayerId::new(n)?;
            let offset = (n - 1) as f64 * 10.0;
            let mut player = Player::new(id, format!("Player{}", n), MAP_ID, Position::planar(offset, offset));
            player.zone = 1;
            player.area = 1;
            Some(Walker { player, speed: 0.1 * n as f64 })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::var("MMO_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:22141".to_string());
    let count: u64 = match std::env::var("MOCK_PLAYERS") {
        Ok(value) => value.parse().context("MOCK_PLAYERS must be a number")?,
        Err(_) => 2,
    };

    info!("Mock feed v{} connecting to {}", VERSION, addr);
    let (mut ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let mut walkers = spawn_walkers(count);
    let mut rng = rand::thread_rng();
    let mut ticker = tokio::time::interval(TICK);

    loop {
        ticker.tick().await;

        for walker in &mut walkers {
            walker.step(&mut rng);
        }

        let update = UpstreamMessage::AllMaps(AllMapsPayload {
            data: vec![MapGroup::new(
                MAP_ID,
                walkers.iter().map(|w| w.player.clone()).collect(),
            )],
        });

        let text = match update.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode snapshot: {}", e);
                continue;
            }
        };

        ws.send(Message::Text(text)).await.context("ingest connection lost")?;
    }
}
