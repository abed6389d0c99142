// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! ArchiveKit Upload - the session-grouped, idempotent upload
//! state machine (C9).
//!
//! - [`staged`]: staged-file discovery and session bucketing.
//! - [`client`]: the `UploadClient` contract implemented against the
//!   real upload platform.
//! - [`task`]: the orchestration that ties both together.

pub mod client;
pub mod staged;
pub mod task;

pub use client::{SubmissionRequest, UploadClient};
pub use staged::{bucket_files, parse_staged_filename, Buckets, StagedFile};
pub use task::{classify, run_upload_task, update_parent_ids, UploadRunReport};
