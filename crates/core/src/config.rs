// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration knobs enumerated in §6 of the design, shared by every
//! crate that needs them. The service binary is the only place that
//! actually loads this from disk (via `figment`); this module only
//! defines the shape and defaults, the same separation the teacher
//! keeps between `apps/skit/src/config.rs` (loading) and the config
//! structs consumed deeper in the stack.

use crate::error::ArchiveError;
use crate::types::StreamerConfig;
use serde::{Deserialize, Serialize};

const fn default_segment_minutes() -> u32 {
    60
}

const fn default_status_check_interval_minutes() -> u32 {
    10
}

const fn default_processing_interval_minutes() -> u32 {
    60
}

const fn default_start_time_adjustment_minutes() -> i64 {
    10
}

const fn default_heartbeat_interval_secs() -> u64 {
    30
}

const fn default_reconnect_delay_secs() -> u64 {
    5
}

const fn default_reconnect_max() -> u32 {
    3
}

const fn default_stale_session_threshold_hours() -> i64 {
    12
}

const fn default_upload_buffer_minutes() -> i64 {
    5
}

const fn default_min_file_size_mb() -> u64 {
    1
}

fn default_danmaku_suffix() -> String {
    "弹幕版".to_string()
}

fn default_no_danmaku_suffix() -> String {
    "".to_string()
}

/// Process-wide recording configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Folder where in-progress `.flv.part`/`.xml.part` segments are written.
    pub processing_folder: String,
    /// Duration of one recording segment, in minutes. Must be > 0.
    #[serde(default = "default_segment_minutes")]
    pub segment_minutes: u32,
    /// Minutes subtracted from the going-live detection time to compute
    /// a session's recorded start time.
    #[serde(default = "default_start_time_adjustment_minutes")]
    pub start_time_adjustment_minutes: i64,
    /// Path to the transcoder binary (e.g. ffmpeg).
    pub transcoder_path: String,
    /// Extra environment variables for the transcoder child process
    /// (library search path, VA driver name/path, device node, etc).
    #[serde(default)]
    pub transcoder_env: std::collections::BTreeMap<String, String>,
    /// Skip re-encoding in the downstream processing stage.
    #[serde(default)]
    pub skip_encoding: bool,
}

/// Chat collector configuration (§4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub ws_url: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max: u32,
}

/// Status monitor / scheduler cadence configuration (§4.6, §4.10, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_status_check_interval_minutes")]
    pub status_check_interval_minutes: u32,
    #[serde(default = "default_processing_interval_minutes")]
    pub processing_interval_minutes: u32,
    #[serde(default = "default_stale_session_threshold_hours")]
    pub stale_session_threshold_hours: i64,
    #[serde(default)]
    pub process_only_after_stream_end: bool,
    /// Minutes after going-offline before the one-shot pipeline run fires.
    #[serde(default = "default_post_offline_delay_minutes")]
    pub post_offline_delay_minutes: u32,
}

const fn default_post_offline_delay_minutes() -> u32 {
    3
}

/// Upload stage configuration (§4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub staging_folder: String,
    #[serde(default = "default_min_file_size_mb")]
    pub min_valid_file_size_mb: u64,
    #[serde(default = "default_upload_buffer_minutes")]
    pub session_window_buffer_minutes: i64,
    #[serde(default)]
    pub delete_after_upload: bool,
    #[serde(default = "default_scheduled_upload_enabled")]
    pub scheduled_upload_enabled: bool,
    #[serde(default = "default_danmaku_suffix")]
    pub danmaku_title_suffix: String,
    #[serde(default = "default_no_danmaku_suffix")]
    pub no_danmaku_title_suffix: String,
    /// Path to the submission metadata YAML (§6, title template/category/tags/...).
    pub submission_metadata_path: String,
}

const fn default_scheduled_upload_enabled() -> bool {
    true
}

/// Persistent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub database_path: String,
}

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub streamers: Vec<StreamerConfig>,
    pub recording: RecordingConfig,
    pub chat: ChatConfig,
    pub scheduler: SchedulerConfig,
    pub upload: UploadConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Validates the numeric/duration knobs that must be positive.
    /// Mirrors the teacher's fail-fast-at-startup posture for
    /// configuration errors (§7: `Fatal`).
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Fatal` describing the first invalid knob found.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.recording.segment_minutes == 0 {
            return Err(ArchiveError::Fatal("recording.segment_minutes must be > 0".to_string()));
        }
        if self.chat.heartbeat_interval_secs == 0 {
            return Err(ArchiveError::Fatal("chat.heartbeat_interval_secs must be > 0".to_string()));
        }
        if self.chat.reconnect_delay_secs == 0 {
            return Err(ArchiveError::Fatal("chat.reconnect_delay_secs must be > 0".to_string()));
        }
        if self.scheduler.status_check_interval_minutes == 0 {
            return Err(ArchiveError::Fatal(
                "scheduler.status_check_interval_minutes must be > 0".to_string(),
            ));
        }
        if self.scheduler.processing_interval_minutes == 0 {
            return Err(ArchiveError::Fatal(
                "scheduler.processing_interval_minutes must be > 0".to_string(),
            ));
        }
        if self.streamers.is_empty() {
            return Err(ArchiveError::Fatal("at least one streamer must be configured".to_string()));
        }
        Ok(())
    }
}

/// The submission metadata YAML (§6): title template, category, tags, etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    /// Title template with a literal `{time}` placeholder.
    pub title_template: String,
    pub category_id: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_url: String,
    #[serde(default)]
    pub description: String,
    pub cover_path: Option<String>,
    #[serde(default)]
    pub dynamic_text: String,
    pub upload_cdn_hint: Option<String>,
}

impl SubmissionMetadata {
    /// Substitutes the `{time}` placeholder with the session date in
    /// `YYYY年MM月DD日` form (§6).
    #[must_use]
    pub fn title_for(&self, session_date: chrono::NaiveDate) -> String {
        let formatted = session_date.format("%Y年%m月%d日").to_string();
        self.title_template.replace("{time}", &formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_config() -> AppConfig {
        AppConfig {
            streamers: vec![StreamerConfig { name: "S".to_string(), room_id: "123".to_string() }],
            recording: RecordingConfig {
                processing_folder: "/tmp/processing".to_string(),
                segment_minutes: 60,
                start_time_adjustment_minutes: 10,
                transcoder_path: "ffmpeg".to_string(),
                transcoder_env: std::collections::BTreeMap::new(),
                skip_encoding: false,
            },
            chat: ChatConfig {
                ws_url: "wss://chat.example".to_string(),
                heartbeat_interval_secs: 30,
                reconnect_delay_secs: 5,
                reconnect_max: 3,
            },
            scheduler: SchedulerConfig {
                status_check_interval_minutes: 10,
                processing_interval_minutes: 60,
                stale_session_threshold_hours: 12,
                process_only_after_stream_end: false,
                post_offline_delay_minutes: 3,
            },
            upload: UploadConfig {
                staging_folder: "/tmp/staging".to_string(),
                min_valid_file_size_mb: 1,
                session_window_buffer_minutes: 5,
                delete_after_upload: false,
                scheduled_upload_enabled: true,
                danmaku_title_suffix: "弹幕版".to_string(),
                no_danmaku_title_suffix: String::new(),
                submission_metadata_path: "/tmp/metadata.yaml".to_string(),
            },
            store: StoreConfig { database_path: "/tmp/archive.db".to_string() },
        }
    }

    #[test]
    fn zero_segment_duration_is_rejected() {
        let mut config = sample_config();
        config.recording.segment_minutes = 0;
        assert!(matches!(config.validate(), Err(ArchiveError::Fatal(_))));
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn empty_streamer_list_is_rejected() {
        let mut config = sample_config();
        config.streamers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn title_template_substitutes_time() {
        let metadata = SubmissionMetadata {
            title_template: "S直播录像{time}弹幕版".to_string(),
            category_id: 1,
            tags: vec![],
            source_url: String::new(),
            description: String::new(),
            cover_path: None,
            dynamic_text: String::new(),
            upload_cdn_hint: None,
        };
        let date = NaiveDate::from_ymd_opt(2026, 2, 24).expect("valid date");
        assert_eq!(metadata.title_for(date), "S直播录像2026年02月24日弹幕版");
    }
}
