//! WebSocket push channel for notifications and job progress.
//!
//! Connection lifecycle:
//! 1. Client opens `GET /ws/notifications`
//! 2. Server sends Welcome with the currently visible notifications
//! 3. Every coordinator update is pushed as a Notification message
//! 4. `WatchJob` streams one job's monotonic status sequence
//! 5. Heartbeat every 30s; 3 missed = disconnect

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::types::ApiContext;
use crate::core_state::CoreState;
use crate::jobs::JobStatus;
use crate::notify::{NotificationInput, NotificationRecord, NotificationUpdate};

/// Heartbeat interval: server sends Heartbeat every 30 seconds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Disconnect after this many missed heartbeats (3 × 30s = 90s).
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Maximum incoming messages per second per connection.
const MAX_INCOMING_PER_SECOND: u32 = 10;

/// Jobs one connection may watch at once.
const MAX_WATCHED_JOBS: usize = 16;

// ═══════════════════════════════════════════════════════════
// Wire messages
// ═══════════════════════════════════════════════════════════

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutgoing {
    Welcome {
        connection_id: String,
        notifications: Vec<NotificationRecord>,
    },
    Notification {
        update: NotificationUpdate,
    },
    /// Sent after the connection fell behind the update stream.
    Resync {
        notifications: Vec<NotificationRecord>,
    },
    JobStatus {
        status: JobStatus,
    },
    Heartbeat {
        server_time: String,
    },
    Error {
        message: String,
    },
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsIncoming {
    Pong {},
    WatchJob { job_id: String },
    Dismiss { key: String },
}

// ═══════════════════════════════════════════════════════════
// WsSessionState
// ═══════════════════════════════════════════════════════════

#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    SendHeartbeat,
    HeartbeatTimeout,
}

/// Per-connection heartbeat and rate state, kept apart from the socket so
/// it can be tested without one.
pub(crate) struct WsSessionState {
    missed_heartbeats: u32,
    incoming_times: VecDeque<Instant>,
}

impl WsSessionState {
    fn new() -> Self {
        Self {
            missed_heartbeats: 0,
            incoming_times: VecDeque::new(),
        }
    }

    fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }
        self.missed_heartbeats += 1;
        HeartbeatAction::SendHeartbeat
    }

    fn check_rate(&mut self) -> bool {
        check_incoming_rate(&mut self.incoming_times)
    }
}

/// Returns `true` if another incoming message fits in the 1s window.
fn check_incoming_rate(timestamps: &mut VecDeque<Instant>) -> bool {
    let now = Instant::now();
    let one_sec_ago = now - Duration::from_secs(1);

    while let Some(&front) = timestamps.front() {
        if front < one_sec_ago {
            timestamps.pop_front();
        } else {
            break;
        }
    }

    if timestamps.len() as u32 >= MAX_INCOMING_PER_SECOND {
        return false;
    }
    timestamps.push_back(now);
    true
}

// ═══════════════════════════════════════════════════════════
// Connection handling
// ═══════════════════════════════════════════════════════════

/// `GET /ws/notifications`
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(ctx): State<ApiContext>) -> impl IntoResponse {
    let core = ctx.core.clone();
    ws.on_upgrade(move |socket| handle_ws(socket, core))
}

async fn handle_ws(socket: WebSocket, core: Arc<CoreState>) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(connection_id = %connection_id, "WebSocket connected");

    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsOutgoing>(64);

    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Subscribe before the snapshot so no update falls between the two.
    let mut updates = core.notifications.subscribe();
    let _ = tx
        .send(WsOutgoing::Welcome {
            connection_id: connection_id.clone(),
            notifications: core.notifications.visible(),
        })
        .await;

    let forward_tx = tx.clone();
    let forward_core = core.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            let msg = match updates.recv().await {
                Ok(update) => WsOutgoing::Notification { update },
                Err(RecvError::Lagged(_)) => WsOutgoing::Resync {
                    notifications: forward_core.notifications.visible(),
                },
                Err(RecvError::Closed) => break,
            };
            if forward_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut watchers: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut session = WsSessionState::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // Consume initial immediate tick

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(ref text))) => {
                        if !session.check_rate() {
                            continue;
                        }
                        match serde_json::from_str::<WsIncoming>(text) {
                            Ok(WsIncoming::Pong {}) => session.on_pong(),
                            Ok(WsIncoming::WatchJob { job_id }) => {
                                watch_job(&core, job_id, &tx, &mut watchers).await;
                            }
                            Ok(WsIncoming::Dismiss { key }) => {
                                core.notifications.apply(NotificationInput::Dismiss { key });
                            }
                            Err(e) => {
                                let _ = tx.send(WsOutgoing::Error {
                                    message: format!("Unrecognised message: {e}"),
                                }).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ping/Pong handled by axum/tungstenite
                }
            }
            _ = heartbeat.tick() => {
                match session.on_heartbeat_tick() {
                    HeartbeatAction::HeartbeatTimeout => {
                        tracing::info!(
                            connection_id = %connection_id,
                            "{MAX_MISSED_HEARTBEATS} missed heartbeats, disconnecting"
                        );
                        break;
                    }
                    HeartbeatAction::SendHeartbeat => {
                        let _ = tx.send(WsOutgoing::Heartbeat {
                            server_time: chrono::Utc::now().to_rfc3339(),
                        }).await;
                    }
                }
            }
        }
    }

    forwarder.abort();
    for (_, watcher) in watchers.drain() {
        watcher.abort();
    }
    drop(tx);
    let _ = sender_handle.await;

    tracing::info!(connection_id = %connection_id, "WebSocket disconnected");
}

/// Stream one tracked job's statuses to the client until it finishes.
async fn watch_job(
    core: &Arc<CoreState>,
    job_id: String,
    tx: &mpsc::Sender<WsOutgoing>,
    watchers: &mut HashMap<String, JoinHandle<()>>,
) {
    watchers.retain(|_, w| !w.is_finished());
    if watchers.contains_key(&job_id) {
        return;
    }
    if core.tracker.record(&job_id).is_none() {
        let _ = tx
            .send(WsOutgoing::Error {
                message: format!("Job not found: {job_id}"),
            })
            .await;
        return;
    }
    if watchers.len() >= MAX_WATCHED_JOBS {
        let _ = tx
            .send(WsOutgoing::Error {
                message: format!("At most {MAX_WATCHED_JOBS} jobs can be watched at once"),
            })
            .await;
        return;
    }

    let mut statuses = core.tracker.subscribe(&job_id);
    let tx = tx.clone();
    let handle = tokio::spawn(async move {
        while let Some(status) = statuses.next().await {
            if tx.send(WsOutgoing::JobStatus { status }).await.is_err() {
                break;
            }
        }
    });
    watchers.insert(job_id, handle);
}
