// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Layered configuration loading for the archiver binary: a required
//! `archiver.toml` (the domain knobs `archivekit-core::config` already
//! shapes, plus the handful this binary owns) overlaid with `SK_`-
//! prefixed environment variables, and a separate YAML file for
//! per-streamer submission metadata.

use archivekit_core::config::{AppConfig, ChatConfig, RecordingConfig, SchedulerConfig, StoreConfig, SubmissionMetadata, UploadConfig};
use archivekit_core::{ArchiveError, StreamerConfig};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::Level;

/// How the source-platform adapter resolves streams and polls status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DouyuConfig {
    pub base_url: String,
    pub device_id: String,
    /// Status endpoint template with a literal `{room_id}` placeholder.
    pub status_url_template: String,
}

impl DouyuConfig {
    #[must_use]
    pub fn status_url(&self, room_id: &str) -> String {
        self.status_url_template.replace("{room_id}", room_id)
    }
}

/// Session/cookie credentials for the target upload platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BilibiliConfig {
    pub api_base_url: String,
    pub cookie: String,
    pub csrf_token: String,
}

/// External collaborators invoked by the post-processing stage: the
/// XML-to-subtitle converter and the transcoder used for the final mux
/// (§1, §6 - neither's internal logic belongs to this workspace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessConfig {
    pub subtitle_converter_path: String,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_output_extension() -> String {
    "mp4".to_string()
}

/// Log level for filtering messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Console/file logging configuration, the surviving half of the
/// teacher's `LogConfig` (no OpenTelemetry, tokio-console, or
/// profiling switches - this binary has no metrics-export surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default = "default_log_path")]
    pub file_path: String,
}

const fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "./archiver.log".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: default_log_path(),
        }
    }
}

/// Root configuration for the archiver binary: every table
/// `archivekit-core::config::AppConfig` defines, flattened to the
/// top level so `archiver.toml` reads as one flat document, plus the
/// three sections this binary itself owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub streamers: Vec<StreamerConfig>,
    pub recording: RecordingConfig,
    pub chat: ChatConfig,
    pub scheduler: SchedulerConfig,
    pub upload: UploadConfig,
    pub store: StoreConfig,
    pub douyu: DouyuConfig,
    pub bilibili: BilibiliConfig,
    pub postprocess: PostProcessConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl ServiceConfig {
    /// Projects the domain-level knobs into the `AppConfig` shape the
    /// rest of the workspace validates and consumes.
    #[must_use]
    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            streamers: self.streamers.clone(),
            recording: self.recording.clone(),
            chat: self.chat.clone(),
            scheduler: self.scheduler.clone(),
            upload: self.upload.clone(),
            store: self.store.clone(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: ServiceConfig,
    pub file_missing: Option<String>,
}

/// Loads `config_path` (TOML) overlaid with `SK_`-prefixed environment
/// variables.
///
/// Unlike the teacher's server config, most of these knobs have no
/// sensible default (a processing folder or database path can't be
/// invented), so a missing config file is logged and still attempted
/// against environment variables alone rather than silently filled in;
/// extraction fails with a clear "missing field" error if that isn't
/// enough, consistent with §7's "Fatal - configuration missing" policy.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or a required field is
/// missing from both the file and the environment.
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment = Figment::new();
    let mut file_missing = None;

    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: ServiceConfig =
        figment.merge(Env::prefixed("SK_").split("__")).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Loads the per-streamer submission metadata YAML (§6): title
/// template, category, tags, etc, keyed by streamer name since each
/// title template embeds that streamer's own name.
///
/// # Errors
///
/// Returns [`ArchiveError::Fatal`] if the file is missing or malformed.
pub fn load_submission_metadata(path: &str) -> Result<HashMap<String, SubmissionMetadata>, ArchiveError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ArchiveError::Fatal(format!("failed to read submission metadata {path}: {e}")))?;
    serde_saphyr::from_str(&raw)
        .map_err(|e| ArchiveError::Fatal(format!("failed to parse submission metadata {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn douyu_status_url_substitutes_room_id() {
        let config = DouyuConfig {
            base_url: "https://www.douyu.com".to_string(),
            device_id: "dev".to_string(),
            status_url_template: "https://www.douyu.com/betard/{room_id}".to_string(),
        };
        assert_eq!(config.status_url("12345"), "https://www.douyu.com/betard/12345");
    }

    #[test]
    fn load_submission_metadata_parses_per_streamer_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metadata.yaml");
        std::fs::write(
            &path,
            "S:\n  title_template: \"S直播录像{time}\"\n  category_id: 17\n  tags: []\n  source_url: \"https://live.douyu.com/123\"\n  description: \"\"\n  cover_path: null\n  dynamic_text: \"\"\n  upload_cdn_hint: null\n",
        )
        .expect("write");

        let metadata = load_submission_metadata(path.to_str().expect("utf8")).expect("parse");
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["S"].category_id, 17);
    }

    #[test]
    fn load_submission_metadata_missing_file_is_fatal() {
        let err = load_submission_metadata("/nonexistent/metadata.yaml").unwrap_err();
        assert!(matches!(err, ArchiveError::Fatal(_)));
    }
}
