//! WebSocket endpoint for the remote monitor.
//!
//! - Engine → client: the full state map on a fixed interval, command replies
//! - Client → engine: task controls (pause, resume, stop) by job name

pub mod handler;

use crate::api::AppState;
use crate::model::BackupState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Maximum number of queued command replies per connection
const REPLY_CAPACITY: usize = 32;

/// WebSocket event types sent to monitoring clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsEvent {
    /// Every known backup state
    #[serde(rename = "backup:states")]
    States(Vec<BackupState>),

    /// Result of a control command
    #[serde(rename = "command:result")]
    CommandResult {
        job: String,
        action: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// WebSocket command types received from clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsCommand {
    #[serde(rename = "backup:pause")]
    PauseBackup { job: String },

    #[serde(rename = "backup:resume")]
    ResumeBackup { job: String },

    #[serde(rename = "backup:stop")]
    StopBackup { job: String },

    /// Ask for the state map outside the regular push
    #[serde(rename = "backup:states")]
    GetStates,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Monitor client connected");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<WsEvent>(REPLY_CAPACITY);

    // Push the state map periodically and forward command replies
    let push_service = state.service.clone();
    let push_interval = state.push_interval;
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(push_interval);
        loop {
            let event = tokio::select! {
                _ = ticker.tick() => WsEvent::States(push_service.states()),
                reply = reply_rx.recv() => match reply {
                    Some(event) => event,
                    None => break,
                },
            };

            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize event: {:?}", e);
                }
            }
        }
    });

    let command_service = state.service.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsCommand>(&text) {
                    Ok(command) => {
                        let reply = handler::handle_command(&command_service, command).await;
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse WebSocket command: {:?}", e);
                    }
                },
                Message::Close(_) => break,
                _ => debug!("Ignoring non-text frame"),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Monitor client disconnected");
}
