use axum::extract::ws::Message;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use separation_twin::simulator::{Command, Event, ProcessSnapshot, TickFrame};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;

/// Inbound client message. Engine commands are passed through untouched;
/// the rest drive the wall-clock scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum ClientMessage {
    Engine(Command),
    SetSpeed { multiplier: f64 },
    Pause,
    Resume,
}

#[derive(Serialize)]
struct SnapshotMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    state: &'a ProcessSnapshot,
    events: &'a [Event],
}

#[derive(Clone)]
pub struct AppState {
    pub tx: broadcast::Sender<Arc<TickFrame>>,
    pub commands: mpsc::UnboundedSender<ClientMessage>,
}

pub async fn start_ws_server(
    port: u16,
    tx: broadcast::Sender<Arc<TickFrame>>,
    commands: mpsc::UnboundedSender<ClientMessage>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app_state = AppState { tx, commands };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("WebSocket server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(frame: &TickFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SnapshotMessage {
        kind: "snapshot",
        timestamp: chrono::Utc::now().to_rfc3339(),
        state: &frame.snapshot,
        events: &frame.events,
    })
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("New WebSocket connection");

    let mut rx = state.tx.subscribe();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => match encode(&frame) {
                        Ok(json) => {
                            if socket.send(Message::Text(json)).await.is_err() {
                                tracing::info!("Client disconnected");
                                break;
                            }
                        }
                        Err(e) => tracing::error!("failed to encode frame: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("client lagging, {} frames skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            tracing::debug!("client message {:?}", message);
                            if state.commands.send(message).is_err() {
                                tracing::warn!("simulation loop gone, closing connection");
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("dropping malformed client message: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use separation_twin::simulator::plant::LoopId;
    use separation_twin::simulator::{Engine, EngineConfig};

    #[test]
    fn parses_engine_command() {
        let text = r#"{"op":"engine","args":{"type":"set_setpoint","args":{"loop_id":"temperature","value":70.0}}}"#;
        let message: ClientMessage = serde_json::from_str(text).expect("valid message");
        assert!(matches!(
            message,
            ClientMessage::Engine(Command::SetSetpoint { loop_id: LoopId::Temperature, value }) if value == 70.0
        ));
        let reset: ClientMessage =
            serde_json::from_str(r#"{"op":"engine","args":{"type":"reset"}}"#).expect("valid message");
        assert!(matches!(reset, ClientMessage::Engine(Command::Reset)));
    }

    #[test]
    fn parses_scheduler_controls() {
        let speed: ClientMessage = serde_json::from_str(r#"{"op":"set_speed","args":{"multiplier":10.0}}"#)
            .expect("valid message");
        assert!(matches!(speed, ClientMessage::SetSpeed { multiplier } if multiplier == 10.0));
        let pause: ClientMessage = serde_json::from_str(r#"{"op":"pause"}"#).expect("valid message");
        assert!(matches!(pause, ClientMessage::Pause));
    }

    #[test]
    fn rejects_unknown_op() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"op":"explode"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"op":"engine","args":{"type":"nope"}}"#).is_err());
    }

    #[test]
    fn frame_encodes_as_snapshot() {
        let mut engine = Engine::new(EngineConfig::default());
        let (snapshot, events) = engine.step(0.1, Vec::new());
        let json = encode(&TickFrame { snapshot, events }).expect("encodes");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["type"], "snapshot");
        assert!(value["state"]["sim_time"].is_number());
        assert!(value["events"].is_array());
    }
}
