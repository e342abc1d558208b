mod opcua_server;
mod ws_bridge;

use separation_twin::config::AppConfig;
use separation_twin::simulator::{Engine, Scheduler, TickFrame};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing_subscriber::EnvFilter;
use ws_bridge::ClientMessage;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting Separation Train Digital Twin");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    // Per-tick frames for WebSocket clients
    let (tx, _rx) = broadcast::channel::<Arc<TickFrame>>(100);
    // Client messages, drained at the top of each frame
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();

    let mut engine = Engine::new(config.engine.clone());
    tracing::info!("largest simulated step {:.1}s", engine.max_step());
    // Latest snapshot for the OPC UA tag server
    let latest = Arc::new(RwLock::new(engine.snapshot()));

    let ws_port = config.server.ws_port;
    let tx_ws = tx.clone();
    let ws_server = tokio::spawn(async move {
        if let Err(e) = ws_bridge::start_ws_server(ws_port, tx_ws, cmd_tx).await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    let latest_sim = latest.clone();
    let tick_interval = Duration::from_millis(config.server.tick_interval_ms.max(1));
    let mut scheduler = Scheduler::new(engine.config().scheduler.clone());
    let simulation = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Simulation loop started");

        loop {
            interval.tick().await;

            let mut commands = Vec::new();
            while let Ok(message) = cmd_rx.try_recv() {
                match message {
                    ClientMessage::Engine(command) => commands.push(command),
                    ClientMessage::SetSpeed { multiplier } => scheduler.set_speed(multiplier),
                    ClientMessage::Pause => {
                        scheduler.pause();
                        tracing::info!("simulation paused");
                    }
                    ClientMessage::Resume => {
                        scheduler.resume();
                        tracing::info!("simulation resumed");
                    }
                }
            }

            let dt = scheduler.frame(Instant::now()).unwrap_or(0.0);
            if dt <= 0.0 && commands.is_empty() && scheduler.is_paused() {
                continue;
            }

            let (snapshot, events) = engine.step(dt, commands);
            *latest_sim.write().await = snapshot.clone();
            // No subscribers is fine
            let _ = tx.send(Arc::new(TickFrame { snapshot, events }));
        }
    });

    let opcua_port = config.server.opcua_port;
    let opcua = tokio::spawn(async move {
        if let Err(e) = opcua_server::start_opcua_server(opcua_port, latest).await {
            tracing::error!("OPC UA server error: {}", e);
        }
    });

    tracing::info!("Backend initialized:");
    tracing::info!("  - OPC UA tag server on port {}", opcua_port);
    tracing::info!("  - WebSocket on port {}", ws_port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = ws_server => {
            tracing::info!("WebSocket server terminated");
        }
        _ = simulation => {
            tracing::info!("Simulation terminated");
        }
        _ = opcua => {
            tracing::info!("OPC UA server terminated");
        }
    }

    tracing::info!("Shutting down");
}
