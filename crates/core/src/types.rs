// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Domain types shared across the archive pipeline (§3 of the design).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous live session for one streamer.
///
/// Invariant: at most one session per streamer has `end_time == None`
/// at any instant. If both `start_time` and `end_time` are set,
/// `start_time <= end_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: i64,
    pub streamer: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StreamSession {
    /// Whether this session is still open (no `end_time` recorded).
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// The upload-bucketing window `[start - buffer, (end or now) + buffer]`
    /// described in §4.9 step 3.
    #[must_use]
    pub fn upload_window(&self, buffer: chrono::Duration, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_time.unwrap_or(self.created_at);
        let end = self.end_time.unwrap_or(now);
        (start - buffer, end + buffer)
    }
}

/// A persisted record of one upload attempt/artifact (§3).
///
/// Invariant: at most one record per session time window carries a
/// non-null `parent_id` (the parent submission for that session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: i64,
    pub streamer: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub first_part_filename: String,
    pub uploaded_at: DateTime<Utc>,
}

/// One configured streamer: `{name, room id}` from the ordered,
/// process-wide streamer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerConfig {
    pub name: String,
    pub room_id: String,
}

/// Cached live-status value tracked by the status monitor (C6).
///
/// `Unknown` means the last check failed (network/API error); it is
/// never treated as a transition away from whatever was cached before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveStatus {
    Live,
    Offline,
    Unknown,
}

impl LiveStatus {
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// The bucket classification the upload state machine (C9) assigns to
/// a session before deciding what to do with its staged files (§4.9
/// step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBucketState {
    /// An upload record in this window already carries a `parent_id`:
    /// append new files as parts.
    ReadyAppend,
    /// At least one record exists in the window but none has a
    /// `parent_id` yet: hold, don't create a second parent.
    PendingBvid,
    /// No record exists in the window: create a new parent submission.
    NewUpload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC3339 timestamp in test fixture")
    }

    #[test]
    fn session_is_open_without_end_time() {
        let session = StreamSession {
            id: 1,
            streamer: "S".to_string(),
            start_time: Some(ts("2026-02-24T10:00:00Z")),
            end_time: None,
            created_at: ts("2026-02-24T10:00:00Z"),
        };
        assert!(session.is_open());
    }

    #[test]
    fn upload_window_applies_buffer_on_both_sides() {
        let session = StreamSession {
            id: 1,
            streamer: "S".to_string(),
            start_time: Some(ts("2026-02-24T10:00:00Z")),
            end_time: Some(ts("2026-02-24T12:00:00Z")),
            created_at: ts("2026-02-24T10:00:00Z"),
        };
        let (start, end) = session.upload_window(chrono::Duration::minutes(5), ts("2026-02-24T13:00:00Z"));
        assert_eq!(start, ts("2026-02-24T09:55:00Z"));
        assert_eq!(end, ts("2026-02-24T12:05:00Z"));
    }

    #[test]
    fn upload_window_uses_now_for_open_session() {
        let session = StreamSession {
            id: 1,
            streamer: "S".to_string(),
            start_time: Some(ts("2026-02-24T10:00:00Z")),
            end_time: None,
            created_at: ts("2026-02-24T10:00:00Z"),
        };
        let now = ts("2026-02-24T10:30:00Z");
        let (_, end) = session.upload_window(chrono::Duration::minutes(5), now);
        assert_eq!(end, now + chrono::Duration::minutes(5));
    }
}
