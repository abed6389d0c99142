// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-streamer segment coordinator (C7).
//!
//! One actor per configured streamer, driven by a `watch` channel the
//! scheduler (C10) updates after every status-check tick. The actor
//! owns the OFFLINE/RESOLVING/RECORDING/CLOSING state machine for one
//! streamer and is the only writer of that streamer's session rows.

use archivekit_chat::ChatLogWriter;
use archivekit_core::{ArchiveError, StreamerConfig};
use archivekit_douyu::chat_collector::{self, ChatCollectorConfig};
use archivekit_douyu::{Recorder, StreamResolver};
use archivekit_store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

const CHAT_STOP_GRACE: Duration = Duration::from_secs(3);
const INTER_SEGMENT_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Offline,
    Resolving,
    Recording,
    Closing,
}

#[derive(Debug, Clone)]
pub struct SegmentCoordinatorConfig {
    pub streamer: StreamerConfig,
    pub processing_folder: String,
    pub segment_seconds: u64,
    pub start_time_adjustment: chrono::Duration,
    pub transcoder_path: String,
    pub transcoder_env: Vec<(String, String)>,
    pub chat_ws_url: String,
    pub chat_heartbeat_interval: Duration,
    pub chat_reconnect_delay: Duration,
    pub chat_reconnect_max: u32,
}

impl SegmentCoordinatorConfig {
    fn chat_config(&self) -> ChatCollectorConfig {
        ChatCollectorConfig {
            ws_url: self.chat_ws_url.clone(),
            room_id: self.streamer.room_id.clone(),
            heartbeat_interval: self.chat_heartbeat_interval,
            reconnect_delay: self.chat_reconnect_delay,
            reconnect_max: self.chat_reconnect_max,
        }
    }
}

/// Runs the C7 actor until `stop_rx` resolves. `live_rx` is updated by
/// the scheduler whenever C6 observes a status transition for this
/// streamer.
pub async fn run(
    config: SegmentCoordinatorConfig,
    resolver: Arc<StreamResolver>,
    store: SessionStore,
    mut live_rx: watch::Receiver<bool>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        if !*live_rx.borrow() {
            tokio::select! {
                _ = &mut stop_rx => return,
                result = live_rx.changed() => {
                    if result.is_err() {
                        return;
                    }
                },
            }
            continue;
        }

        let now = chrono::Utc::now();
        let start = now - config.start_time_adjustment;
        let session_id = match store.open_session(&config.streamer.name, start).await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(streamer = %config.streamer.name, error = %err, "failed to open session");
                continue;
            },
        };
        tracing::info!(streamer = %config.streamer.name, session_id, "session opened, going live");

        run_live_interval(&config, &resolver, &mut live_rx, &mut stop_rx).await;

        while *live_rx.borrow() {
            tokio::select! {
                _ = &mut stop_rx => {
                    let _ = store.close_session(session_id, chrono::Utc::now()).await;
                    return;
                },
                result = live_rx.changed() => {
                    if result.is_err() {
                        let _ = store.close_session(session_id, chrono::Utc::now()).await;
                        return;
                    }
                },
            }
        }

        if let Err(err) = store.close_session(session_id, chrono::Utc::now()).await {
            tracing::error!(streamer = %config.streamer.name, error = %err, "failed to close session");
        } else {
            tracing::info!(streamer = %config.streamer.name, session_id, "session closed, going offline");
        }
    }
}

/// Runs RESOLVING/RECORDING/CLOSING segments back to back while the
/// stream stays live, until a resolve failure abandons the interval,
/// the stream goes offline, or a stop is requested.
async fn run_live_interval(
    config: &SegmentCoordinatorConfig,
    resolver: &Arc<StreamResolver>,
    live_rx: &mut watch::Receiver<bool>,
    stop_rx: &mut oneshot::Receiver<()>,
) {
    loop {
        if !*live_rx.borrow() {
            return;
        }

        let resolved = match resolver.resolve(&config.streamer.room_id).await {
            Ok(resolved) => resolved,
            Err(ArchiveError::Resolve(msg)) => {
                tracing::warn!(
                    streamer = %config.streamer.name,
                    error = msg,
                    "resolve exhausted retries, staying offline for this live interval"
                );
                return;
            },
            Err(err) => {
                tracing::warn!(streamer = %config.streamer.name, error = %err, "unexpected resolver error");
                return;
            },
        };

        let base = filename_base(&config.streamer.name, chrono::Local::now());
        let flv_path = format!("{}/{base}.flv.part", config.processing_folder);
        let xml_path = format!("{}/{base}.xml.part", config.processing_folder);

        let recorder = Recorder::new(config.transcoder_path.clone(), config.transcoder_env.clone());
        let handle = match recorder.spawn(&resolved.url, &resolved.headers, &flv_path, config.segment_seconds) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(streamer = %config.streamer.name, error = %err, "failed to spawn recorder");
                return;
            },
        };

        let writer = match ChatLogWriter::open(&xml_path).await {
            Ok(writer) => Some(writer),
            Err(err) => {
                tracing::warn!(streamer = %config.streamer.name, error = %err, "chat log writer failed to open, recording without chat");
                None
            },
        };

        let (recorder_stop_tx, recorder_stop_rx) = oneshot::channel();
        let recorder_deadline = Duration::from_secs(config.segment_seconds);
        let mut recorder_task = tokio::spawn(handle.wait_with_deadline(recorder_deadline, recorder_stop_rx));

        let (chat_stop_tx, chat_task) = writer.map_or((None, None), |writer| {
            let (tx, rx) = oneshot::channel();
            let chat_config = config.chat_config();
            let segment_start = Instant::now();
            let task = tokio::spawn(chat_collector::run(chat_config, segment_start, writer, rx));
            (Some(tx), Some(task))
        });

        let mut early_stop = false;
        tokio::select! {
            _ = &mut *stop_rx => { early_stop = true; },
            result = live_rx.changed() => {
                if result.is_err() || !*live_rx.borrow() {
                    early_stop = true;
                }
            },
            result = &mut recorder_task => {
                match result {
                    Ok(Ok(outcome)) => {
                        tracing::info!(streamer = %config.streamer.name, exit_code = ?outcome.exit_code, "recording segment finished");
                    },
                    Ok(Err(err)) => {
                        tracing::warn!(streamer = %config.streamer.name, error = %err, "recorder reported an error");
                    },
                    Err(err) => {
                        tracing::warn!(streamer = %config.streamer.name, error = %err, "recorder task panicked");
                    },
                }
            },
        }

        if early_stop {
            let _ = recorder_stop_tx.send(());
            let _ = recorder_task.await;
        }

        if let Some(chat_stop_tx) = chat_stop_tx {
            let _ = chat_stop_tx.send(());
        }
        if let Some(chat_task) = chat_task {
            let _ = tokio::time::timeout(CHAT_STOP_GRACE, chat_task).await;
        }

        finalize_segment(&flv_path, &xml_path).await;

        if early_stop || !*live_rx.borrow() {
            return;
        }

        tokio::time::sleep(INTER_SEGMENT_COOLDOWN).await;
    }
}

/// Renames both `.part` files to their final names if each is
/// non-empty, XML first so a consumer never sees a visible `.flv`
/// without its matching `.xml`. Leaves `.part` files in place on any
/// failure (including an empty/missing file).
async fn finalize_segment(flv_path: &str, xml_path: &str) {
    let flv_ready = is_non_empty(flv_path).await;
    let xml_ready = is_non_empty(xml_path).await;

    if !flv_ready || !xml_ready {
        tracing::warn!(flv_path, xml_path, flv_ready, xml_ready, "segment incomplete, leaving .part files");
        return;
    }

    let final_xml = xml_path.trim_end_matches(".part");
    let final_flv = flv_path.trim_end_matches(".part");

    if let Err(err) = tokio::fs::rename(xml_path, final_xml).await {
        tracing::error!(xml_path, error = %err, "failed to finalize xml segment");
        return;
    }
    if let Err(err) = tokio::fs::rename(flv_path, final_flv).await {
        tracing::error!(flv_path, error = %err, "failed to finalize flv segment, xml already renamed");
    }
}

async fn is_non_empty(path: &str) -> bool {
    tokio::fs::metadata(path).await.map(|meta| meta.len() > 0).unwrap_or(false)
}

fn filename_base(streamer: &str, now: chrono::DateTime<chrono::Local>) -> String {
    format!("{streamer}录播{}", now.format("%Y-%m-%dT%H_%M_%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_base_uses_filename_safe_separators() {
        let now = chrono::Local.with_ymd_and_hms(2026, 2, 24, 10, 30, 0).single().expect("valid");
        assert_eq!(filename_base("S", now), "S录播2026-02-24T10_30_00");
    }

    #[tokio::test]
    async fn is_non_empty_false_for_missing_file() {
        assert!(!is_non_empty("/nonexistent/path/for/test.flv").await);
    }

    #[tokio::test]
    async fn finalize_segment_leaves_part_files_when_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flv = dir.path().join("seg.flv.part");
        let xml = dir.path().join("seg.xml.part");
        tokio::fs::write(&flv, b"").await.expect("write");
        tokio::fs::write(&xml, b"<i></i>").await.expect("write");

        finalize_segment(flv.to_str().expect("utf8"), xml.to_str().expect("utf8")).await;

        assert!(flv.exists());
        assert!(xml.exists());
    }

    #[tokio::test]
    async fn finalize_segment_renames_both_files_when_non_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flv = dir.path().join("seg.flv.part");
        let xml = dir.path().join("seg.xml.part");
        tokio::fs::write(&flv, b"binary-video-bytes").await.expect("write");
        tokio::fs::write(&xml, b"<i></i>").await.expect("write");

        finalize_segment(flv.to_str().expect("utf8"), xml.to_str().expect("utf8")).await;

        assert!(!flv.exists());
        assert!(!xml.exists());
        assert!(dir.path().join("seg.flv").exists());
        assert!(dir.path().join("seg.xml").exists());
    }
}
