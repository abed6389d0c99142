// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Upload state machine orchestration (C9).
//!
//! Classifies each session's staged-file bucket into READY_APPEND,
//! PENDING_BVID, or NEW_UPLOAD, then drives the configured
//! [`UploadClient`] accordingly. At most one instance of
//! [`run_upload_task`] may execute concurrently per process; the
//! scheduler (C10) is responsible for that serialization.

use crate::client::{SubmissionRequest, UploadClient};
use crate::staged::{bucket_files, StagedFile};
use archivekit_core::{ArchiveError, StreamSession, SubmissionMetadata, UploadBucketState, UploadRecord};
use archivekit_store::SessionStore;
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;

const FEED_STATUS_SET: [&str; 2] = ["published", "being-published"];
const FEED_PAGE_SIZE: u32 = 50;
const BACKFILL_ATTEMPTS: u32 = 3;
const BACKFILL_DELAY: StdDuration = StdDuration::from_secs(15);
const SESSION_LOOKBACK_DAYS: i64 = 3;

/// Summary of one upload task run, for logging / manual-trigger reports.
#[derive(Debug, Default)]
pub struct UploadRunReport {
    pub new_submissions: u32,
    pub appended_parts: u32,
    pub orphan_files: u32,
    pub pending_bvid_buckets: u32,
    pub backfilled: u32,
}

/// Classifies a bucket of in-window upload records into the §4.9 step 4
/// state.
#[must_use]
pub fn classify(records: &[UploadRecord]) -> UploadBucketState {
    if records.is_empty() {
        return UploadBucketState::NewUpload;
    }
    if records.iter().any(|r| r.parent_id.is_some()) {
        UploadBucketState::ReadyAppend
    } else {
        UploadBucketState::PendingBvid
    }
}

/// Runs the back-fill pass: every upload record still missing a parent
/// id is matched against the platform feed by exact title.
///
/// # Errors
///
/// Returns [`ArchiveError::Auth`] if the login check fails.
pub async fn update_parent_ids(
    store: &SessionStore,
    client: &dyn UploadClient,
    streamer: &str,
) -> Result<u32, ArchiveError> {
    if !client.check_login().await? {
        return Err(ArchiveError::Auth("upload platform login check failed".to_string()));
    }

    let missing = store.find_uploads_missing_parent_id(streamer).await?;
    if missing.is_empty() {
        return Ok(0);
    }
    let feed = client.feed(FEED_PAGE_SIZE, &FEED_STATUS_SET).await?;

    let mut backfilled = 0;
    for record in missing {
        if let Some(parent_id) = feed.get(&record.title) {
            store.set_parent_id(record.id, parent_id).await?;
            backfilled += 1;
        }
    }
    Ok(backfilled)
}

/// Polls the feed up to [`BACKFILL_ATTEMPTS`] times, 15s apart, for a
/// just-created submission's parent id. Leaves it null (for the next
/// tick's [`update_parent_ids`]) if still unmatched.
async fn poll_for_parent_id(
    client: &dyn UploadClient,
    title: &str,
) -> Result<Option<String>, ArchiveError> {
    for attempt in 0..BACKFILL_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(BACKFILL_DELAY).await;
        }
        let feed = client.feed(FEED_PAGE_SIZE, &FEED_STATUS_SET).await?;
        if let Some(parent_id) = feed.get(title) {
            return Ok(Some(parent_id.clone()));
        }
    }
    Ok(None)
}

/// Runs one tick of the upload task: buckets staged files against
/// known sessions, then uploads/appends according to each bucket's
/// classification.
///
/// # Errors
///
/// Returns [`ArchiveError::Auth`] if the login check fails (the task
/// aborts without mutating state).
#[allow(clippy::too_many_arguments)]
pub async fn run_upload_task(
    store: &SessionStore,
    client: &dyn UploadClient,
    metadata: &SubmissionMetadata,
    streamer: &str,
    danmaku_suffix: &str,
    staged_files: &[StagedFile],
    session_window_buffer: Duration,
    delete_after_upload: bool,
    now: DateTime<Utc>,
) -> Result<UploadRunReport, ArchiveError> {
    if !client.check_login().await? {
        return Err(ArchiveError::Auth("upload platform login check failed".to_string()));
    }

    let mut report = UploadRunReport::default();
    report.backfilled = update_parent_ids(store, client, streamer).await?;

    let sessions: Vec<StreamSession> =
        store.sessions_since(streamer, now - Duration::days(SESSION_LOOKBACK_DAYS)).await?;
    let own_files: Vec<StagedFile> = staged_files.iter().filter(|f| f.streamer == streamer).cloned().collect();
    let buckets = bucket_files(&own_files, &sessions, session_window_buffer, now);
    report.orphan_files = buckets.orphans.len() as u32;

    let sessions_by_id: std::collections::HashMap<i64, &StreamSession> =
        sessions.iter().map(|s| (s.id, s)).collect();

    for (session_id, mut files) in buckets.by_session {
        let Some(session) = sessions_by_id.get(&session_id) else {
            continue;
        };
        files.sort_by_key(|f| f.timestamp);
        let (window_start, window_end) = session.upload_window(session_window_buffer, now);
        let records = store.find_uploads_in_window(streamer, window_start, window_end).await?;

        match classify(&records) {
            UploadBucketState::PendingBvid => {
                tracing::info!(streamer, session_id, "upload bucket pending parent id, holding");
                report.pending_bvid_buckets += 1;
            },
            UploadBucketState::ReadyAppend => {
                let parent_id = records
                    .iter()
                    .find_map(|r| r.parent_id.clone())
                    .expect("classify guarantees at least one record with a parent id");
                let mut part_number = store.count_uploads_in_window(streamer, window_start, window_end).await? + 1;

                for file in files {
                    let part_name = format!("P{part_number} {}", metadata.title_for(session_date(session)));
                    match client.append_part(&file.path, &parent_id, None, &part_name).await {
                        Ok(()) => {
                            store
                                .insert_upload(streamer, Some(&parent_id), &part_name, &file.path, now)
                                .await?;
                            report.appended_parts += 1;
                            part_number += 1;
                            if delete_after_upload {
                                delete_staged_file(streamer, &file.path).await;
                            }
                        },
                        Err(ArchiveError::Auth(msg)) => return Err(ArchiveError::Auth(msg)),
                        Err(err) => {
                            tracing::warn!(streamer, path = %file.path, error = %err, "append failed, retrying next round");
                        },
                    }
                }
            },
            UploadBucketState::NewUpload => {
                let Some(first) = files.first().cloned() else { continue };
                let title = format!("{}{danmaku_suffix}", metadata.title_for(session_date(session)));
                let request = SubmissionRequest {
                    title: title.clone(),
                    category_id: metadata.category_id,
                    tags: metadata.tags.clone(),
                    source_url: metadata.source_url.clone(),
                    description: metadata.description.clone(),
                    cover_path: metadata.cover_path.clone(),
                    dynamic_text: metadata.dynamic_text.clone(),
                    cdn_hint: metadata.upload_cdn_hint.clone(),
                };

                match client.upload_new(&first.path, &request).await {
                    Ok(parent_id) => {
                        let parent_id = match parent_id {
                            Some(id) => Some(id),
                            None => poll_for_parent_id(client, &title).await?,
                        };
                        store.insert_upload(streamer, parent_id.as_deref(), &title, &first.path, now).await?;
                        report.new_submissions += 1;
                        if delete_after_upload {
                            delete_staged_file(streamer, &first.path).await;
                        }
                    },
                    Err(ArchiveError::Auth(msg)) => return Err(ArchiveError::Auth(msg)),
                    Err(err) => {
                        tracing::warn!(streamer, path = %first.path, error = %err, "new submission failed, retrying next round");
                    },
                }
            },
        }
    }

    Ok(report)
}

fn session_date(session: &StreamSession) -> chrono::NaiveDate {
    session.start_time.unwrap_or(session.created_at).date_naive()
}

/// Removes a staged file once its upload record is committed. The
/// record already exists at this point, so a failed delete is logged
/// and left for manual cleanup rather than failing the task.
async fn delete_staged_file(streamer: &str, path: &str) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        tracing::warn!(streamer, path, error = %err, "failed to delete staged file after upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_empty_bucket_is_new_upload() {
        assert_eq!(classify(&[]), UploadBucketState::NewUpload);
    }

    #[test]
    fn classify_with_parent_id_is_ready_append() {
        let records = vec![UploadRecord {
            id: 1,
            streamer: "S".to_string(),
            parent_id: Some("X1".to_string()),
            title: "t".to_string(),
            first_part_filename: "f".to_string(),
            uploaded_at: Utc::now(),
        }];
        assert_eq!(classify(&records), UploadBucketState::ReadyAppend);
    }

    #[test]
    fn classify_without_parent_id_is_pending_bvid() {
        let records = vec![UploadRecord {
            id: 1,
            streamer: "S".to_string(),
            parent_id: None,
            title: "t".to_string(),
            first_part_filename: "f".to_string(),
            uploaded_at: Utc::now(),
        }];
        assert_eq!(classify(&records), UploadBucketState::PendingBvid);
    }
}
