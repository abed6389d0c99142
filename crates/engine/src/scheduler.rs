// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Cadence scheduler (C10): status-check, video-pipeline, and
//! stale-session-cleanup jobs, plus one-shot post-offline runs.
//!
//! Each periodic job owns a `tokio::time::Interval` set to
//! [`MissedTickBehavior::Skip`] so a long tick doesn't burst catch-up
//! runs afterward, and a non-reentrancy guard so a slow run is never
//! overlapped by the next tick.

use crate::post_process::{discover_ready_segments, VideoPostProcessor};
use archivekit_core::{ArchiveError, SubmissionMetadata};
use archivekit_douyu::{LiveState, StatusMonitor};
use archivekit_store::SessionStore;
use archivekit_upload::{parse_staged_filename, run_upload_task, StagedFile, UploadClient, UploadRunReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::MissedTickBehavior;

/// One configured streamer's live-status monitor and the channel its
/// segment coordinator watches for go-live / go-offline edges.
pub struct StreamerHandle {
    pub name: String,
    pub room_id: String,
    monitor: Mutex<StatusMonitor>,
    live_tx: watch::Sender<bool>,
}

impl StreamerHandle {
    #[must_use]
    pub fn new(name: String, room_id: String, monitor: StatusMonitor) -> (Self, watch::Receiver<bool>) {
        let (live_tx, live_rx) = watch::channel(false);
        (Self { name, room_id, monitor: Mutex::new(monitor), live_tx }, live_rx)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub status_check_interval: Duration,
    pub video_pipeline_interval: Duration,
    pub stale_session_threshold: chrono::Duration,
    pub post_offline_delay: Duration,
    pub process_only_after_stream_end: bool,
    pub session_window_buffer: chrono::Duration,
    pub processing_folder: String,
    pub upload_staging_folder: String,
    pub danmaku_suffix: String,
    /// Whether the periodic video-pipeline tick is allowed to run the
    /// upload stage at all; [`Scheduler::run_upload_tick_once`]'s
    /// manual trigger ignores this, since the flag only gates the
    /// scheduled cadence.
    pub scheduled_upload_enabled: bool,
    /// Whether a staged file may be deleted once its upload record is
    /// committed.
    pub delete_after_upload: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
    store: SessionStore,
    streamers: Vec<Arc<StreamerHandle>>,
    upload_client: Arc<dyn UploadClient>,
    post_processor: Arc<dyn VideoPostProcessor>,
    /// Per-streamer submission metadata (title template, category,
    /// etc.) since the title template embeds the streamer's own name.
    metadata_by_streamer: std::collections::HashMap<String, SubmissionMetadata>,
    video_pipeline_running: Arc<AtomicBool>,
    stale_cleanup_running: Arc<AtomicBool>,
    video_pipeline_notify: Arc<Notify>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        store: SessionStore,
        streamers: Vec<Arc<StreamerHandle>>,
        upload_client: Arc<dyn UploadClient>,
        post_processor: Arc<dyn VideoPostProcessor>,
        metadata_by_streamer: std::collections::HashMap<String, SubmissionMetadata>,
    ) -> Self {
        Self {
            config,
            store,
            streamers,
            upload_client,
            post_processor,
            metadata_by_streamer,
            video_pipeline_running: Arc::new(AtomicBool::new(false)),
            stale_cleanup_running: Arc::new(AtomicBool::new(false)),
            video_pipeline_notify: Arc::new(Notify::new()),
        }
    }

    /// Initializes every streamer's monitor, then spawns the status,
    /// video-pipeline, and stale-cleanup jobs. Runs until `stop_rx`
    /// resolves.
    pub async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        for streamer in &self.streamers {
            let mut monitor = streamer.monitor.lock().await;
            monitor.initialize().await;
            let _ = streamer.live_tx.send(monitor.is_live());
            tracing::info!(streamer = %streamer.name, live = monitor.is_live(), "status monitor initialized");
        }

        let mut handles = Vec::new();
        for streamer in self.streamers.clone() {
            let this = Arc::clone(&self);
            let mut stop_rx = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                this.status_check_loop(streamer, &mut stop_rx).await;
            }));
        }
        {
            let this = Arc::clone(&self);
            let mut stop_rx = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                this.video_pipeline_loop(&mut stop_rx).await;
            }));
        }
        {
            let this = Arc::clone(&self);
            let mut stop_rx = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                this.stale_cleanup_loop(&mut stop_rx).await;
            }));
        }

        let _ = stop_rx.wait_for(|stop| *stop).await;
        for handle in handles {
            handle.abort();
        }
    }

    async fn status_check_loop(&self, streamer: Arc<StreamerHandle>, stop_rx: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.status_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                result = stop_rx.wait_for(|stop| *stop) => {
                    if result.is_ok() { return; }
                },
            }

            let change = streamer.monitor.lock().await.detect_change().await;
            let Some((prev, curr)) = change else { continue };
            tracing::info!(streamer = %streamer.name, ?prev, ?curr, "status transition detected");
            let _ = streamer.live_tx.send(matches!(curr, LiveState::Live));

            if matches!(curr, LiveState::Offline) && self.config.process_only_after_stream_end {
                let notify = Arc::clone(&self.video_pipeline_notify);
                let delay = self.config.post_offline_delay;
                let streamer_name = streamer.name.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    tracing::info!(streamer = %streamer_name, "post-offline delay elapsed, triggering pipeline run");
                    notify.notify_one();
                });
            }
        }
    }

    async fn video_pipeline_loop(&self, stop_rx: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.video_pipeline_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                () = self.video_pipeline_notify.notified() => {},
                result = stop_rx.wait_for(|stop| *stop) => {
                    if result.is_ok() { return; }
                },
            }

            if self.video_pipeline_running.swap(true, Ordering::SeqCst) {
                tracing::debug!("video pipeline already running, skipping this tick");
                continue;
            }
            if let Err(err) = self.run_video_pipeline().await {
                tracing::error!(error = %err, "video pipeline run failed");
            }
            self.video_pipeline_running.store(false, Ordering::SeqCst);
        }
    }

    async fn discover_staged_files(&self) -> Result<Vec<StagedFile>, ArchiveError> {
        let mut staged_entries = tokio::fs::read_dir(&self.config.upload_staging_folder).await.map_err(ArchiveError::Io)?;
        let mut staged_files = Vec::new();
        while let Some(entry) = staged_entries.next_entry().await.map_err(ArchiveError::Io)? {
            let Some(name) = entry.path().to_str().map(str::to_string) else { continue };
            if let Some(staged) = parse_staged_filename(&name) {
                staged_files.push(staged);
            }
        }
        Ok(staged_files)
    }

    async fn run_video_pipeline(&self) -> Result<(), ArchiveError> {
        let ready = discover_ready_segments(&self.config.processing_folder).await?;
        for segment in ready {
            if let Err(err) = self.post_processor.process(&segment).await {
                tracing::warn!(base = %segment.base, error = %err, "post-processing failed, will retry next tick");
            }
        }

        if !self.config.scheduled_upload_enabled {
            tracing::debug!("scheduled upload disabled, skipping upload stage this tick");
            return Ok(());
        }

        let staged_files = self.discover_staged_files().await?;
        for streamer in &self.streamers {
            let Some(metadata) = self.metadata_by_streamer.get(&streamer.name) else {
                tracing::warn!(streamer = %streamer.name, "no submission metadata configured, skipping upload task");
                continue;
            };
            let report = run_upload_task(
                &self.store,
                self.upload_client.as_ref(),
                metadata,
                &streamer.name,
                &self.config.danmaku_suffix,
                &staged_files,
                self.config.session_window_buffer,
                self.config.delete_after_upload,
                chrono::Utc::now(),
            )
            .await?;
            tracing::info!(
                streamer = %streamer.name,
                new_submissions = report.new_submissions,
                appended_parts = report.appended_parts,
                orphan_files = report.orphan_files,
                pending_bvid_buckets = report.pending_bvid_buckets,
                backfilled = report.backfilled,
                "upload task tick complete"
            );
        }
        Ok(())
    }

    /// Manual trigger entry point: runs a single upload-task tick for
    /// one configured streamer outside the periodic cadence, and
    /// returns the same [`UploadRunReport`] the periodic job logs, for
    /// an out-of-scope HTTP/CLI wrapper to render. Does not touch the
    /// non-reentrancy guard the periodic job uses, since a caller here
    /// is explicitly asking for an immediate run. Ignores
    /// `scheduled_upload_enabled`, since that flag only gates the
    /// periodic cadence, not an explicit manual request.
    pub async fn run_upload_tick_once(&self, streamer_name: &str) -> Result<UploadRunReport, ArchiveError> {
        let metadata = self
            .metadata_by_streamer
            .get(streamer_name)
            .ok_or_else(|| ArchiveError::Fatal(format!("no submission metadata configured for {streamer_name}")))?;
        let staged_files = self.discover_staged_files().await?;
        run_upload_task(
            &self.store,
            self.upload_client.as_ref(),
            metadata,
            streamer_name,
            &self.config.danmaku_suffix,
            &staged_files,
            self.config.session_window_buffer,
            self.config.delete_after_upload,
            chrono::Utc::now(),
        )
        .await
    }

    async fn stale_cleanup_loop(&self, stop_rx: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(12 * 60 * 60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                result = stop_rx.wait_for(|stop| *stop) => {
                    if result.is_ok() { return; }
                },
            }

            if self.stale_cleanup_running.swap(true, Ordering::SeqCst) {
                continue;
            }
            let threshold = chrono::Utc::now() - self.config.stale_session_threshold;
            match self.store.close_stale_sessions(threshold).await {
                Ok(count) if count > 0 => tracing::info!(count, "closed stale sessions"),
                Ok(_) => {},
                Err(err) => tracing::error!(error = %err, "stale session cleanup failed"),
            }
            self.stale_cleanup_running.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamer_handle_starts_with_live_false() {
        let monitor = StatusMonitor::new(reqwest::Client::new(), "http://127.0.0.1:1/status".to_string());
        let (_handle, rx) = StreamerHandle::new("S".to_string(), "123".to_string(), monitor);
        assert!(!*rx.borrow());
    }
}
