// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Live-status monitor (C6).
//!
//! Polls a JSON status endpoint and caches a three-valued status.
//! Two consecutive API errors never produce a transition: an `Unknown`
//! read always compares equal to itself for transition purposes.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Live,
    Offline,
}

/// `show_status` comes back as a JSON number in some deployments and a
/// numeric string in others; accept both rather than failing the whole
/// payload over a wire-format quirk.
fn deserialize_show_status<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ShowStatus {
        Int(i64),
        Str(String),
    }

    match ShowStatus::deserialize(deserializer)? {
        ShowStatus::Int(value) => Ok(value),
        ShowStatus::Str(value) => value.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(deserialize_with = "deserialize_show_status")]
    show_status: i64,
}

/// Per-streamer status poller with a cached last-known state.
pub struct StatusMonitor {
    client: reqwest::Client,
    status_url: String,
    cached_live: bool,
    initialized: bool,
}

impl StatusMonitor {
    #[must_use]
    pub fn new(client: reqwest::Client, status_url: String) -> Self {
        Self { client, status_url, cached_live: false, initialized: false }
    }

    /// One HTTP call against the status endpoint. Returns `None` on
    /// any network, timeout, or parse error - never fabricates a
    /// result.
    pub async fn check(&self) -> Option<LiveState> {
        let response = self
            .client
            .get(&self.status_url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: StatusResponse = response.json().await.ok()?;
        match body.show_status {
            1 => Some(LiveState::Live),
            2 => Some(LiveState::Offline),
            other => {
                tracing::warn!(show_status = other, "unrecognized show_status value, treating as no reading");
                None
            }
        }
    }

    /// Runs one `check()` and seeds the cache; `None` is treated as
    /// offline so startup never assumes a streamer is live.
    pub async fn initialize(&mut self) {
        self.cached_live = matches!(self.check().await, Some(LiveState::Live));
        self.initialized = true;
    }

    /// Returns `Some((prev, curr))` only when a fresh read succeeds and
    /// differs from the cached state; otherwise `None`, including on
    /// API error.
    pub async fn detect_change(&mut self) -> Option<(LiveState, LiveState)> {
        let curr = self.check().await?;
        let prev = if self.cached_live { LiveState::Live } else { LiveState::Offline };
        if curr == prev {
            return None;
        }
        self.cached_live = matches!(curr, LiveState::Live);
        Some((prev, curr))
    }

    /// Cached state; `false` before [`Self::initialize`] has run.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.initialized && self.cached_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_mock(body: serde_json::Value) -> String {
        let app = Router::new().route("/status", get(move || async move { Json(body.clone()) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}/status")
    }

    #[tokio::test]
    async fn is_live_defaults_to_false_before_initialize() {
        let monitor = StatusMonitor::new(reqwest::Client::new(), "http://127.0.0.1:1/status".to_string());
        assert!(!monitor.is_live());
    }

    #[tokio::test]
    async fn initialize_caches_live_state() {
        let url = spawn_mock(json!({"show_status": "1"})).await;
        let mut monitor = StatusMonitor::new(reqwest::Client::new(), url);
        monitor.initialize().await;
        assert!(monitor.is_live());
    }

    #[tokio::test]
    async fn check_accepts_integer_show_status() {
        let url = spawn_mock(json!({"show_status": 1})).await;
        let monitor = StatusMonitor::new(reqwest::Client::new(), url);
        assert_eq!(monitor.check().await, Some(LiveState::Live));
    }

    #[tokio::test]
    async fn check_maps_show_status_two_to_offline() {
        let url = spawn_mock(json!({"show_status": 2})).await;
        let monitor = StatusMonitor::new(reqwest::Client::new(), url);
        assert_eq!(monitor.check().await, Some(LiveState::Offline));
    }

    #[tokio::test]
    async fn initialize_treats_error_as_offline() {
        let mut monitor =
            StatusMonitor::new(reqwest::Client::new(), "http://127.0.0.1:1/status".to_string());
        monitor.initialize().await;
        assert!(!monitor.is_live());
    }

    #[tokio::test]
    async fn detect_change_reports_transition_on_difference() {
        let url = spawn_mock(json!({"show_status": "1"})).await;
        // A freshly constructed monitor starts cached_live = false, so the
        // first live reading is a real offline -> live transition.
        let mut monitor = StatusMonitor::new(reqwest::Client::new(), url);
        let change = monitor.detect_change().await;
        assert_eq!(change, Some((LiveState::Offline, LiveState::Live)));
    }

    #[tokio::test]
    async fn detect_change_is_none_on_repeated_api_errors() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let mut monitor =
            StatusMonitor::new(reqwest::Client::new(), "http://127.0.0.1:1/status".to_string());
        for _ in 0..2 {
            call_count.fetch_add(1, Ordering::SeqCst);
            assert_eq!(monitor.detect_change().await, None);
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }
}
