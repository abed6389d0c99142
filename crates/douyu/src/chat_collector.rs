// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Chat collector (C5).
//!
//! A small state machine driving one WebSocket connection per segment:
//! connect, log in, join the room group, then alternate between
//! sending heartbeats and relaying `chatmsg` events into a C2 writer.

use archivekit_chat::{frame, ChatLogWriter};
use archivekit_core::ArchiveError;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

const JOIN_GROUP_ID: i64 = -9999;
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Connecting,
    LoggedIn,
    Joined,
    Running,
    Reconnecting,
    Stopped,
}

/// Counts of ignored, non-`chatmsg` frame types, for observability.
#[derive(Debug, Default, Clone)]
pub struct ChatCollectorStats {
    pub messages_written: u64,
    pub malformed_frames: u64,
    pub ignored_by_type: HashMap<String, u64>,
}

/// Outcome of a collector run: either it reached the end of the
/// segment window normally, or its reconnect budget was exhausted.
#[derive(Debug)]
pub enum ChatCollectorOutcome {
    Completed(ChatCollectorStats),
    Degraded(ChatCollectorStats),
}

pub struct ChatCollectorConfig {
    pub ws_url: String,
    pub room_id: String,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_max: u32,
}

/// Runs the chat collector until `stop_rx` fires, writing messages
/// into `writer` with offsets relative to `segment_start`.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] if the writer cannot be flushed or
/// closed.
pub async fn run(
    config: ChatCollectorConfig,
    segment_start: Instant,
    mut writer: ChatLogWriter,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<ChatCollectorOutcome, ArchiveError> {
    let mut stats = ChatCollectorStats::default();
    let mut attempt = 0u32;

    'reconnect: loop {
        let mut state = ChatState::Connecting;
        let connection = tokio_tungstenite::connect_async(&config.ws_url).await;
        let mut socket = match connection {
            Ok((socket, _response)) => socket,
            Err(err) => {
                attempt += 1;
                tracing::warn!(attempt, error = %err, "chat websocket connect failed");
                if attempt > config.reconnect_max {
                    break 'reconnect;
                }
                tokio::time::sleep(config.reconnect_delay).await;
                continue 'reconnect;
            },
        };

        if send_frame(&mut socket, &login_payload(&config.room_id)).await.is_err() {
            attempt += 1;
            if attempt > config.reconnect_max {
                break 'reconnect;
            }
            tokio::time::sleep(config.reconnect_delay).await;
            continue 'reconnect;
        }
        state = ChatState::LoggedIn;

        if send_frame(&mut socket, &join_group_payload(&config.room_id)).await.is_err() {
            attempt += 1;
            if attempt > config.reconnect_max {
                break 'reconnect;
            }
            tokio::time::sleep(config.reconnect_delay).await;
            continue 'reconnect;
        }
        state = ChatState::Running;
        attempt = 0;

        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; consume it
        let mut last_inbound = Instant::now();
        let silence_budget = config.heartbeat_interval * 2;
        let mut buffer = BytesMut::new();

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    let _ = tokio::time::timeout(STOP_GRACE, socket.close(None)).await;
                    state = ChatState::Stopped;
                    break;
                },
                _ = heartbeat.tick() => {
                    let payload = heartbeat_payload();
                    if send_frame(&mut socket, &payload).await.is_err() {
                        state = ChatState::Reconnecting;
                        break;
                    }
                },
                message = socket.next() => {
                    match message {
                        Some(Ok(Message::Binary(data))) => {
                            last_inbound = Instant::now();
                            buffer.extend_from_slice(&data);
                            let (payloads, malformed) = frame::iter_payloads(&mut buffer);
                            stats.malformed_frames += malformed as u64;
                            for payload in payloads {
                                handle_payload(&payload, segment_start, &mut writer, &mut stats).await?;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            state = ChatState::Reconnecting;
                            break;
                        },
                        Some(Ok(_)) => {
                            last_inbound = Instant::now();
                        },
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "chat websocket read error");
                            state = ChatState::Reconnecting;
                            break;
                        },
                    }
                },
                () = tokio::time::sleep_until(last_inbound + silence_budget) => {
                    tracing::warn!("chat websocket silent for 2x heartbeat interval");
                    state = ChatState::Reconnecting;
                    break;
                },
            }
        }

        match state {
            ChatState::Stopped => break 'reconnect,
            ChatState::Reconnecting => {
                attempt += 1;
                if attempt > config.reconnect_max {
                    break 'reconnect;
                }
                tokio::time::sleep(config.reconnect_delay).await;
                continue 'reconnect;
            },
            _ => unreachable!("run loop only exits via Stopped or Reconnecting"),
        }
    }

    let degraded = attempt > config.reconnect_max;
    writer.close().await.map_err(|e| ArchiveError::Io(to_io_error(e)))?;
    Ok(if degraded {
        ChatCollectorOutcome::Degraded(stats)
    } else {
        ChatCollectorOutcome::Completed(stats)
    })
}

async fn handle_payload(
    payload: &str,
    segment_start: Instant,
    writer: &mut ChatLogWriter,
    stats: &mut ChatCollectorStats,
) -> Result<(), ArchiveError> {
    let fields = frame::parse(payload);
    let Some(msg_type) = fields.get("type") else {
        return Ok(());
    };
    if msg_type != "chatmsg" {
        *stats.ignored_by_type.entry(msg_type.clone()).or_insert(0) += 1;
        return Ok(());
    }

    let text = fields.get("txt").cloned().unwrap_or_default();
    let user = fields.get("nn").cloned().unwrap_or_default();
    let offset = segment_start.elapsed().as_secs_f64();

    writer
        .write(offset, &text, 1, 25, 0xFFFFFF, &user)
        .await
        .map_err(|e| ArchiveError::Io(to_io_error(e)))?;
    stats.messages_written += 1;
    Ok(())
}

fn to_io_error(err: archivekit_chat::ChatLogError) -> std::io::Error {
    std::io::Error::other(err.to_string())
}

async fn send_frame(
    socket: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    payload: &str,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let framed = frame::pack(payload);
    socket.send(Message::Binary(framed.freeze())).await
}

fn login_payload(room_id: &str) -> String {
    let mut map = HashMap::new();
    map.insert("type".to_string(), "loginreq".to_string());
    map.insert("roomid".to_string(), room_id.to_string());
    frame::encode(&map)
}

fn join_group_payload(room_id: &str) -> String {
    let mut map = HashMap::new();
    map.insert("type".to_string(), "joingroup".to_string());
    map.insert("rid".to_string(), room_id.to_string());
    map.insert("gid".to_string(), JOIN_GROUP_ID.to_string());
    frame::encode(&map)
}

fn heartbeat_payload() -> String {
    let mut map = HashMap::new();
    map.insert("type".to_string(), "keeplive".to_string());
    map.insert("tick".to_string(), chrono::Utc::now().timestamp().to_string());
    frame::encode(&map)
}
