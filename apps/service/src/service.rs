// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Composition root: wires the store, one segment coordinator per
//! configured streamer, and the cadence scheduler together, then runs
//! until a `ctrl_c` signal asks everything to wind down cleanly (§11
//! "Graceful shutdown").

use crate::bilibili::BilibiliUploadClient;
use crate::config::ServiceConfig;
use crate::transcoder::FfmpegPostProcessor;
use archivekit_core::{ArchiveError, SubmissionMetadata};
use archivekit_douyu::StreamResolver;
use archivekit_engine::{spawn_streamer, Engine, Scheduler, SchedulerConfig, SegmentCoordinatorConfig, StreamerWiring};
use archivekit_store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn scheduler_config(config: &ServiceConfig) -> SchedulerConfig {
    SchedulerConfig {
        status_check_interval: Duration::from_secs(u64::from(config.scheduler.status_check_interval_minutes) * 60),
        video_pipeline_interval: Duration::from_secs(u64::from(config.scheduler.processing_interval_minutes) * 60),
        stale_session_threshold: chrono::Duration::hours(config.scheduler.stale_session_threshold_hours),
        post_offline_delay: Duration::from_secs(u64::from(config.scheduler.post_offline_delay_minutes) * 60),
        process_only_after_stream_end: config.scheduler.process_only_after_stream_end,
        session_window_buffer: chrono::Duration::minutes(config.upload.session_window_buffer_minutes),
        processing_folder: config.recording.processing_folder.clone(),
        upload_staging_folder: config.upload.staging_folder.clone(),
        danmaku_suffix: config.upload.danmaku_title_suffix.clone(),
        scheduled_upload_enabled: config.upload.scheduled_upload_enabled,
        delete_after_upload: config.upload.delete_after_upload,
    }
}

fn coordinator_config(config: &ServiceConfig, streamer: &archivekit_core::StreamerConfig) -> SegmentCoordinatorConfig {
    SegmentCoordinatorConfig {
        streamer: streamer.clone(),
        processing_folder: config.recording.processing_folder.clone(),
        segment_seconds: u64::from(config.recording.segment_minutes) * 60,
        start_time_adjustment: chrono::Duration::minutes(config.recording.start_time_adjustment_minutes),
        transcoder_path: config.recording.transcoder_path.clone(),
        transcoder_env: config.recording.transcoder_env.clone().into_iter().collect(),
        chat_ws_url: config.chat.ws_url.clone(),
        chat_heartbeat_interval: Duration::from_secs(config.chat.heartbeat_interval_secs),
        chat_reconnect_delay: Duration::from_secs(config.chat.reconnect_delay_secs),
        chat_reconnect_max: config.chat.reconnect_max,
    }
}

/// Runs the archiver until `ctrl_c` is received.
///
/// # Errors
///
/// Returns [`ArchiveError::Fatal`] if the store cannot be opened.
pub async fn run(config: ServiceConfig, metadata: HashMap<String, SubmissionMetadata>) -> Result<(), ArchiveError> {
    let store = SessionStore::connect(&config.store.database_path).await?;

    let http_client = reqwest::Client::new();
    let resolver =
        Arc::new(StreamResolver::new(http_client.clone(), config.douyu.base_url.clone(), config.douyu.device_id.clone()));
    let upload_client: Arc<dyn archivekit_upload::UploadClient> = Arc::new(BilibiliUploadClient::new(
        http_client.clone(),
        config.bilibili.api_base_url.clone(),
        config.bilibili.cookie.clone(),
        config.bilibili.csrf_token.clone(),
    ));
    let post_processor: Arc<dyn archivekit_engine::VideoPostProcessor> = Arc::new(FfmpegPostProcessor::new(
        config.recording.transcoder_path.clone(),
        config.postprocess.subtitle_converter_path.clone(),
        config.upload.staging_folder.clone(),
        config.postprocess.output_extension.clone(),
        config.recording.skip_encoding,
    ));

    let mut streamer_handles = Vec::with_capacity(config.streamers.len());
    let mut coordinator_stops = Vec::with_capacity(config.streamers.len());
    for streamer in &config.streamers {
        let wiring = StreamerWiring {
            streamer: streamer.clone(),
            status_url: config.douyu.status_url(&streamer.room_id),
            coordinator: coordinator_config(&config, streamer),
        };
        let (handle, stop_tx) = spawn_streamer(wiring, http_client.clone(), Arc::clone(&resolver), store.clone());
        streamer_handles.push(handle);
        coordinator_stops.push(stop_tx);
    }

    let scheduler = Scheduler::new(
        scheduler_config(&config),
        store.clone(),
        streamer_handles,
        upload_client,
        post_processor,
        metadata,
    );
    let engine = Engine::new(scheduler, coordinator_stops);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, closing out in-flight segments");
            let _ = stop_tx.send(true);
        }
    });

    engine.run(stop_rx).await;
    tracing::info!("archiver service stopped");
    Ok(())
}
