// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Staged-file discovery and session bucketing (§4.9 steps 1-3).

use archivekit_core::StreamSession;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// One file found in the upload-staging folder, with its streamer and
/// timestamp parsed out of the filename (`{streamer}录播{ts}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: String,
    pub streamer: String,
    pub timestamp: DateTime<Utc>,
}

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+?)录播(\d{4}-\d{2}-\d{2}T\d{2}_\d{2}_\d{2})")
            .expect("filename pattern is a valid, fixed regular expression")
    })
}

/// Parses the streamer name and recording timestamp embedded in a
/// staged filename. Matches against the file's basename only, so a
/// directory component earlier in `path` can never be mistaken for the
/// streamer prefix. Returns `None` if the filename doesn't carry the
/// expected pattern.
#[must_use]
pub fn parse_staged_filename(path: &str) -> Option<StagedFile> {
    let basename = std::path::Path::new(path).file_name()?.to_str()?;
    let captured = filename_pattern().captures(basename)?;
    let streamer = captured.get(1)?.as_str();
    let raw = captured.get(2)?.as_str();
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H_%M_%S").ok()?;
    Some(StagedFile { path: path.to_string(), streamer: streamer.to_string(), timestamp: naive.and_utc() })
}

/// The outcome of bucketing staged files against known sessions.
#[derive(Debug, Default)]
pub struct Buckets {
    /// Session id -> files whose timestamp falls in that session's window.
    pub by_session: HashMap<i64, Vec<StagedFile>>,
    /// Files matching no session window, logged and skipped this round.
    pub orphans: Vec<StagedFile>,
}

/// Buckets `files` into the first session (by session start time, a
/// stable tie-break) whose `[start - buffer, end-or-now + buffer]`
/// window contains the file's timestamp.
#[must_use]
pub fn bucket_files(
    files: &[StagedFile],
    sessions: &[StreamSession],
    buffer: chrono::Duration,
    now: DateTime<Utc>,
) -> Buckets {
    let mut windows: Vec<(i64, DateTime<Utc>, DateTime<Utc>)> = sessions
        .iter()
        .map(|session| {
            let (start, end) = session.upload_window(buffer, now);
            (session.id, start, end)
        })
        .collect();
    windows.sort_by_key(|(_, start, _)| *start);

    let mut result = Buckets::default();
    for file in files {
        let matched = windows
            .iter()
            .find(|(_, start, end)| *start <= file.timestamp && file.timestamp <= *end);
        match matched {
            Some((session_id, _, _)) => {
                result.by_session.entry(*session_id).or_default().push(file.clone());
            },
            None => {
                tracing::warn!(path = %file.path, "staged file matches no session window, skipping");
                result.orphans.push(file.clone());
            },
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC3339 timestamp in test fixture")
    }

    fn session(id: i64, start: &str, end: Option<&str>) -> StreamSession {
        StreamSession {
            id,
            streamer: "S".to_string(),
            start_time: Some(ts(start)),
            end_time: end.map(ts),
            created_at: ts(start),
        }
    }

    #[test]
    fn parses_embedded_timestamp() {
        let parsed = parse_staged_filename("S录播2026-02-24T10_30_00.mp4").expect("parses");
        assert_eq!(parsed.timestamp, ts("2026-02-24T10:30:00Z"));
        assert_eq!(parsed.streamer, "S");
    }

    #[test]
    fn parses_streamer_prefix_from_directory_path() {
        let parsed = parse_staged_filename("/staging/Alice录播2026-02-24T10_30_00.mp4").expect("parses");
        assert_eq!(parsed.streamer, "Alice");
    }

    #[test]
    fn rejects_filenames_without_the_pattern() {
        assert!(parse_staged_filename("random_file.mp4").is_none());
    }

    #[test]
    fn file_at_exact_window_boundary_is_included() {
        let session = session(1, "2026-02-24T10:00:00Z", Some("2026-02-24T12:00:00Z"));
        let buffer = chrono::Duration::minutes(5);
        let file = StagedFile { path: "f".to_string(), streamer: "S".to_string(), timestamp: ts("2026-02-24T09:55:00Z") };
        let buckets = bucket_files(&[file], &[session], buffer, ts("2026-02-24T13:00:00Z"));
        assert_eq!(buckets.by_session.get(&1).map(Vec::len), Some(1));
    }

    #[test]
    fn file_outside_every_window_is_an_orphan() {
        let session = session(1, "2026-02-24T10:00:00Z", Some("2026-02-24T12:00:00Z"));
        let buffer = chrono::Duration::minutes(5);
        let file = StagedFile { path: "f".to_string(), streamer: "S".to_string(), timestamp: ts("2026-02-24T20:00:00Z") };
        let buckets = bucket_files(&[file], &[session], buffer, ts("2026-02-24T21:00:00Z"));
        assert!(buckets.by_session.is_empty());
        assert_eq!(buckets.orphans.len(), 1);
    }

    #[test]
    fn overlapping_windows_bind_to_earliest_start() {
        let earlier = session(1, "2026-02-24T09:00:00Z", Some("2026-02-24T11:00:00Z"));
        let later = session(2, "2026-02-24T10:00:00Z", Some("2026-02-24T12:00:00Z"));
        let buffer = chrono::Duration::minutes(30);
        let file = StagedFile { path: "f".to_string(), streamer: "S".to_string(), timestamp: ts("2026-02-24T10:30:00Z") };
        let buckets = bucket_files(&[file], &[earlier, later], buffer, ts("2026-02-24T13:00:00Z"));
        assert_eq!(buckets.by_session.get(&1).map(Vec::len), Some(1));
        assert!(!buckets.by_session.contains_key(&2));
    }
}
