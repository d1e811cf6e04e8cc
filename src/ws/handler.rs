//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, PlayerInput};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg, WeaponType};

/// A match can end between reserving a slot and the join reaching it
const JOIN_ATTEMPTS: usize = 3;

/// Direct replies queued per connection
const DIRECT_BUFFER: usize = 32;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name shown to other players
    #[serde(default)]
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let user_id = Uuid::new_v4();
    info!(user_id = %user_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, query.name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, display_name: Option<String>, state: AppState) {
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Send welcome message
    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let (direct_tx, direct_rx) = mpsc::channel::<ServerMsg>(DIRECT_BUFFER);
    let Some((handle, snapshot_rx)) = join(&state, user_id, display_name, &direct_tx).await else {
        error!(user_id = %user_id, "Could not join a match");
        return;
    };

    let session = Session {
        user_id,
        input_tx: handle.input_tx,
        direct_tx,
    };
    session.run(ws_sink, ws_stream, direct_rx, snapshot_rx).await;

    info!(user_id = %user_id, "WebSocket connection closed");
}

/// Reserve a slot and hand the join to the match task
async fn join(
    state: &AppState,
    user_id: Uuid,
    display_name: Option<String>,
    direct_tx: &mpsc::Sender<ServerMsg>,
) -> Option<(MatchHandle, broadcast::Receiver<ServerMsg>)> {
    for attempt in 1..=JOIN_ATTEMPTS {
        let handle = state.join_match();
        // Subscribe before joining so the PlayerJoined broadcast is not missed
        let snapshot_rx = handle.snapshot_tx.subscribe();
        let join = PlayerInput {
            user_id,
            msg: ClientMsg::JoinMatch {
                display_name: display_name.clone(),
            },
            reply_tx: direct_tx.clone(),
        };
        if handle.input_tx.send(join).await.is_ok() {
            return Some((handle, snapshot_rx));
        }
        warn!(user_id = %user_id, match_id = %handle.id, attempt, "Match closed before join");
    }
    None
}

/// One connected player's read/write loops
struct Session {
    user_id: Uuid,
    input_tx: mpsc::Sender<PlayerInput>,
    direct_tx: mpsc::Sender<ServerMsg>,
}

impl Session {
    fn input(&self, msg: ClientMsg) -> PlayerInput {
        PlayerInput {
            user_id: self.user_id,
            msg,
            reply_tx: self.direct_tx.clone(),
        }
    }

    fn reply_error(&self, code: &str, message: String) {
        let _ = self.direct_tx.try_send(ServerMsg::Error {
            code: code.to_string(),
            message,
        });
    }

    /// Run the WebSocket session with read/write split
    async fn run(
        self,
        ws_sink: futures::stream::SplitSink<WebSocket, Message>,
        mut ws_stream: futures::stream::SplitStream<WebSocket>,
        direct_rx: mpsc::Receiver<ServerMsg>,
        snapshot_rx: broadcast::Receiver<ServerMsg>,
    ) {
        let user_id = self.user_id;
        let rate_limiter = PlayerRateLimiter::new();
        let writer_handle = tokio::spawn(write_loop(user_id, ws_sink, direct_rx, snapshot_rx));

        // Reader loop: WebSocket -> match loop
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check_input() {
                        warn!(user_id = %user_id, "Rate limited input message");
                        self.reply_error("rate_limited", "Too many messages".to_string());
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(ClientMsg::JoinMatch { .. }) => {
                            self.reply_error("already_joined", "Already in a match".to_string());
                        }
                        Ok(ClientMsg::LeaveMatch) => {
                            info!(user_id = %user_id, "Client left the match");
                            break;
                        }
                        Ok(client_msg) => {
                            if self.input_tx.send(self.input(client_msg)).await.is_err() {
                                debug!(user_id = %user_id, "Input channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                            self.reply_error(parse_error_code(&text), e.to_string());
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(user_id = %user_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) => {
                    debug!(user_id = %user_id, "Received ping");
                }
                Ok(Message::Pong(_)) => {
                    debug!(user_id = %user_id, "Received pong");
                }
                Ok(Message::Close(_)) => {
                    info!(user_id = %user_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }

        // Signal disconnect to match loop
        let _ = self.input_tx.send(self.input(ClientMsg::LeaveMatch)).await;

        writer_handle.abort();
    }
}

/// Writer task: broadcast snapshots and direct replies -> WebSocket
async fn write_loop(
    user_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut direct_rx: mpsc::Receiver<ServerMsg>,
    mut snapshot_rx: broadcast::Receiver<ServerMsg>,
) {
    loop {
        let msg = tokio::select! {
            direct = direct_rx.recv() => match direct {
                Some(msg) => msg,
                None => break,
            },
            received = snapshot_rx.recv() => match received {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        user_id = %user_id,
                        lagged_count = n,
                        "Client lagged, skipping {} messages", n
                    );
                    // Continue - don't disconnect for lag
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(user_id = %user_id, "Match channel closed");
                    break;
                }
            },
        };

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

/// Error code for a message that failed to parse
fn parse_error_code(text: &str) -> &'static str {
    let weapon = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| value.get("weapon").cloned());

    match weapon {
        Some(ref weapon) if WeaponType::deserialize(weapon).is_err() => "unknown_weapon",
        _ => "bad_message",
    }
}
