//! Floe Sync Demo
//!
//! Boots one packice session through the session runtime and drives it with
//! two in-process predicting clients behind an artificial one-way latency.
//!
//! Usage: `floe-sync [config.json]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use floe_sync::{
    core::rng::derive_session_seed,
    game::{Packice, PackiceInput, PACKICE},
    network::ClientOutbound,
    ClientIndex, ClientPredictor, EngineConfig, Ranking, SessionManager, SessionToken,
    SimulatorRegistry, VERSION,
};

/// One-way delay applied to every frame in both directions.
const LATENCY: Duration = Duration::from_millis(30);

/// How often a client moves its stick.
const STEER_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("loading config {path}"))?,
        None => EngineConfig::default(),
    };

    info!("Floe Sync v{}", VERSION);
    info!(
        "Tick: {} ms, max sub-step: {} ms, copy verification: {}",
        config.tick_interval_ms, config.max_sub_step_ms, config.verify_snapshot_copies
    );

    let manager = Arc::new(SessionManager::new(SimulatorRegistry::default(), config.clone()));

    let (senders, receivers): (Vec<_>, Vec<_>) = (0..2).map(|_| mpsc::channel(64)).unzip();
    let (token, session) = manager.create_session(PACKICE, senders).await?;
    let seed = derive_session_seed(&token, PACKICE.0);
    info!("Session {} seed {:#018x}", token, seed);

    let start = Instant::now();
    let mut clients = Vec::new();
    for (idx, inbox) in receivers.into_iter().enumerate() {
        let me = ClientIndex(idx as u8);
        let predictor = ClientPredictor::new(Packice::new(seed), me, &config);
        let manager = Arc::clone(&manager);
        clients.push(tokio::spawn(run_client(manager, token, predictor, inbox, start)));
    }

    let outcome = session.await.context("session task panicked")?;
    info!("Session outcome: {:?}", outcome);

    for client in clients {
        match client.await.context("client task panicked")? {
            Ok(Some(ranking)) => info!("Client saw final ranking {:?}", ranking),
            Ok(None) => info!("Client left without a ranking"),
            Err(err) => warn!("Client failed: {err:#}"),
        }
    }
    Ok(())
}

/// Stick position for client `me` at steering step `step`.
fn stick(me: ClientIndex, step: u32) -> (f32, f32) {
    match me.0 {
        // Skate down the field, weaving left and right
        0 => (if step % 4 < 2 { 0.4 } else { -0.4 }, 1.0),
        // Stand still
        _ => (0.0, 0.0),
    }
}

async fn run_client(
    manager: Arc<SessionManager>,
    token: SessionToken,
    mut predictor: ClientPredictor<Packice>,
    mut inbox: mpsc::Receiver<ClientOutbound>,
    start: Instant,
) -> Result<Option<Ranking>> {
    let me = predictor.client();
    let now = || start.elapsed().as_millis() as u64;

    manager.send_frame(token, me, predictor.flush(now())).await?;

    let mut steer = interval(STEER_INTERVAL);
    let mut step = 0u32;
    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(ClientOutbound::Frame(bytes)) => {
                    sleep(LATENCY).await;
                    let outbound = predictor.on_server_frame(&bytes, now())?;
                    if let Some(ranking) = predictor.ranking() {
                        return Ok(Some(ranking.clone()));
                    }
                    if let Some(outbound) = outbound {
                        let state = predictor.snapshot();
                        debug!(
                            client = %me,
                            clock = predictor.clock(),
                            alive = state.alive(),
                            "resynced"
                        );
                        sleep(LATENCY).await;
                        manager.send_frame(token, me, outbound).await?;
                    }
                }
                Some(ClientOutbound::Rejected { reason }) => bail!("frame rejected: {reason}"),
                None => return Ok(None),
            },
            _ = steer.tick() => {
                let (x, y) = stick(me, step);
                step += 1;
                predictor.add_input(&PackiceInput::encode_axes(x, y), now())?;
            }
        }
    }
}
