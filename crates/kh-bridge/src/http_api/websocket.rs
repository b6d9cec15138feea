//! WebSocket endpoints: the agent connection gateway (§4.3) and the
//! admin/dashboard event-stream relay.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::{extract::State, response::IntoResponse};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use kh_core::apikey::hash_token;
use kh_core::types::{DeviceType, PhysicalDevice, SyncStatus};

use crate::filesync::SyncManifest;
use crate::ingest::IngestEvent;
use crate::origin_validation::{get_default_allowed_origins, validate_websocket_origin};
use crate::protocol::{AgentMessage, BridgeEvent, DetectedPhysicalDevice};

use super::state::ApiState;

// ---------------------------------------------------------------------------
// Agent connection gateway
// ---------------------------------------------------------------------------

/// WebSocket GET /ws/agent -- an agent's persistent session. Authenticated
/// via the `(X-API-Key, X-Agent-ID)` header pair (§4.2); every other
/// dispatch/progress/recovery message rides this one socket for the life of
/// the connection.
pub(crate) async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let agent_id = match headers.get("x-agent-id").and_then(|v| v.to_str().ok()).and_then(|s| s.parse::<i64>().ok()) {
        Some(id) => id,
        None => return axum::http::StatusCode::BAD_REQUEST.into_response(),
    };
    let api_key = match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        Some(k) => k.to_string(),
        None => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };

    let key_hash = hash_token(&api_key);
    if state.store.authenticate_agent(agent_id, &key_hash).await.is_err() {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_agent_ws(socket, state, agent_id))
}

async fn handle_agent_ws(socket: WebSocket, state: Arc<ApiState>, agent_id: i64) {
    let gateway = state.gateway.clone();
    let outbox = gateway.register(agent_id);
    info!(agent_id, "agent connected");

    let _ = state.store.record_heartbeat(agent_id).await;

    let (ws_tx, ws_rx) = socket.split();
    let last_seen = Arc::new(AtomicI64::new(0));

    let writer = tokio::spawn(writer_loop(
        ws_tx,
        outbox,
        last_seen.clone(),
        Duration::from_secs(state.config.gateway.ping_period_secs),
        Duration::from_secs(state.config.gateway.pong_wait_secs),
    ));
    let reader = reader_loop(ws_rx, state.clone(), agent_id, last_seen);

    reader.await;
    writer.abort();
    gateway.unregister(agent_id);
    state.filesync.forget(agent_id);
    info!(agent_id, "agent disconnected");
}

/// Drains the per-agent outbox onto the socket and sends keepalive pings;
/// aborted by the reader side once the connection drops.
async fn writer_loop(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbox: tokio::sync::mpsc::Receiver<AgentMessage>,
    last_seen: Arc<AtomicI64>,
    ping_period: Duration,
    pong_wait: Duration,
) {
    let start = Instant::now();
    let mut ping_interval = tokio::time::interval(ping_period);
    loop {
        tokio::select! {
            msg = outbox.recv() => {
                let Some(msg) = msg else { break };
                let Ok(json) = serde_json::to_string(&msg) else { continue };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                let elapsed = last_seen.load(Ordering::Relaxed);
                if elapsed > 0 && start.elapsed().as_secs() as i64 - elapsed > pong_wait.as_secs() as i64 {
                    warn!("agent pong wait exceeded, closing connection");
                    break;
                }
                let Ok(json) = serde_json::to_string(&AgentMessage::Ping) else { continue };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Reads agent-originated frames off the socket, applying inventory/sync
/// updates directly and forwarding dispatch-correlated replies to the
/// gateway. Progress/crack-batch ingest (C7) is out of scope here.
async fn reader_loop(
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    state: Arc<ApiState>,
    agent_id: i64,
    last_seen: Arc<AtomicI64>,
) {
    let start = Instant::now();
    while let Some(frame) = ws_rx.next().await {
        let Ok(frame) = frame else { break };
        let Message::Text(text) = frame else {
            if matches!(frame, Message::Close(_)) {
                break;
            }
            continue;
        };
        last_seen.store(start.elapsed().as_secs() as i64, Ordering::Relaxed);

        let Ok(msg) = serde_json::from_str::<AgentMessage>(&text) else {
            warn!(agent_id, "received malformed agent message");
            continue;
        };

        match msg {
            AgentMessage::Ping | AgentMessage::Pong => {}
            AgentMessage::PhysicalDeviceDetection { devices } => {
                handle_device_detection(&state, agent_id, devices).await;
            }
            AgentMessage::SyncRequest => {
                handle_sync_request(&state, agent_id).await;
            }
            AgentMessage::DownloadComplete { file_id, sha256 } => {
                match state.filesync.handle_download_complete(agent_id, file_id, &sha256, &state.gateway) {
                    Ok(true) => {
                        if let Err(e) = state.store.set_sync_status(agent_id, SyncStatus::Completed).await {
                            warn!(agent_id, error = %e, "failed to mark sync completed");
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!(agent_id, %file_id, error = %e, "failed to advance file sync queue"),
                }
            }
            AgentMessage::DownloadFailed { file_id, error } => {
                if let Err(e) = state.filesync.handle_download_failed(agent_id, file_id, &error, &state.gateway) {
                    warn!(agent_id, %file_id, error = %e, "failed to re-queue failed download");
                }
            }
            AgentMessage::DownloadProgress { file_id, bytes_received, bytes_total } => {
                debug!(agent_id, %file_id, bytes_received, bytes_total, "download progress");
            }
            AgentMessage::SyncStatusUpdate { status } => {
                handle_sync_status(&state, agent_id, &status).await;
            }
            AgentMessage::BenchmarkResult {
                request_id,
                hashes_per_second,
                succeeded,
                error,
            } => {
                let reply = AgentMessage::BenchmarkResult {
                    request_id,
                    hashes_per_second,
                    succeeded,
                    error,
                };
                let _ = state.gateway.resolve(agent_id, request_id, reply).await;
            }
            AgentMessage::JobStatus {
                task_id,
                status,
                keyspace_processed,
                progress_percent,
                hash_rate,
                detected_crack_count,
            } => {
                forward_to_ingest(
                    &state,
                    IngestEvent::JobStatus {
                        agent_id,
                        task_id,
                        status,
                        keyspace_processed,
                        progress_percent,
                        hash_rate,
                        detected_crack_count,
                    },
                )
                .await;
            }
            AgentMessage::CrackBatch { task_id, batch_number, cracks } => {
                forward_to_ingest(
                    &state,
                    IngestEvent::CrackBatch {
                        agent_id,
                        task_id,
                        batch_number,
                        cracks,
                    },
                )
                .await;
            }
            AgentMessage::BatchesComplete { task_id } => {
                forward_to_ingest(&state, IngestEvent::BatchesComplete { agent_id, task_id }).await;
            }
            other => {
                debug!(agent_id, ?other, "unhandled agent message");
            }
        }
    }
}

async fn handle_device_detection(state: &Arc<ApiState>, agent_id: i64, devices: Vec<DetectedPhysicalDevice>) {
    let physical: Vec<PhysicalDevice> = devices
        .into_iter()
        .map(|d| PhysicalDevice {
            id: uuid::Uuid::new_v4(),
            agent_id,
            device_index: d.device_index,
            device_type: d.device_type,
            enabled: matches!(d.device_type, DeviceType::Gpu),
            selected_runtime: None,
            processors: Some(d.processors),
            clock_mhz: d.clock_mhz,
            memory_mb: d.memory_mb,
            pci_address: d.pci_address,
        })
        .collect();
    if let Err(e) = state.store.replace_devices(agent_id, &physical).await {
        warn!(agent_id, error = %e, "failed to persist device inventory");
    }
}

/// An agent requests its file inventory on every reconnect, not just first
/// boot, so the manifest is rescanned fresh each time rather than cached.
async fn handle_sync_request(state: &Arc<ApiState>, agent_id: i64) {
    if let Err(e) = state.store.set_sync_status(agent_id, SyncStatus::InProgress).await {
        warn!(agent_id, error = %e, "failed to mark sync in_progress");
    }
    let manifest = match SyncManifest::scan(&state.config.gateway.resources_dir) {
        Ok(m) => m,
        Err(e) => {
            warn!(agent_id, error = %e, "failed to scan file sync manifest");
            return;
        }
    };
    if let Err(e) = state.filesync.begin_sync(agent_id, &manifest, &state.gateway) {
        warn!(agent_id, error = %e, "failed to start file sync");
    }
}

async fn forward_to_ingest(state: &Arc<ApiState>, event: IngestEvent) {
    if let Some(tx) = &state.ingest_tx {
        if tx.send(event).await.is_err() {
            warn!("ingest channel closed, dropping progress/crack update");
        }
    } else {
        debug!("ingest worker not wired, dropping progress/crack update");
    }
}

async fn handle_sync_status(state: &Arc<ApiState>, agent_id: i64, status: &str) {
    let target = match status {
        "in_progress" => SyncStatus::InProgress,
        "completed" => SyncStatus::Completed,
        "failed" => SyncStatus::Failed,
        _ => return,
    };
    if let Err(e) = state.store.set_sync_status(agent_id, target).await {
        warn!(agent_id, error = %e, "failed to apply sync status transition");
    }
}

// ---------------------------------------------------------------------------
// Admin/dashboard event stream
// ---------------------------------------------------------------------------

/// WebSocket GET /api/events/ws -- republishes [`BridgeEvent`]s to dashboard
/// clients, with a 30s heartbeat.
pub(crate) async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(status) = validate_websocket_origin(&headers, &get_default_allowed_origins()) {
        return status.into_response();
    }
    ws.on_upgrade(move |socket| handle_events_ws(socket, state))
}

async fn handle_events_ws(socket: WebSocket, state: Arc<ApiState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let rx = state.event_bus.subscribe();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            result = rx.recv_async() => {
                match result {
                    Ok(msg) => {
                        let json = serde_json::to_string::<BridgeEvent>(&msg).unwrap_or_default();
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            _ = heartbeat.tick() => {
                let ping = serde_json::json!({"type": "ping", "timestamp": chrono::Utc::now().to_rfc3339()});
                if ws_tx.send(Message::Text(ping.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
