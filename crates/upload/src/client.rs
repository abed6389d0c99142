// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The external upload platform's client contract (§6, "External
//! collaborators").

use archivekit_core::ArchiveError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Metadata passed through to a new parent submission.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub title: String,
    pub category_id: u64,
    pub tags: Vec<String>,
    pub source_url: String,
    pub description: String,
    pub cover_path: Option<String>,
    pub dynamic_text: String,
    pub cdn_hint: Option<String>,
}

/// The narrow surface this crate needs from the upload platform.
/// Implemented against the real platform by the service binary.
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// Verifies the session/credentials are still valid.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Transient`] on a network failure.
    async fn check_login(&self) -> Result<bool, ArchiveError>;

    /// Creates a new parent submission from `path`, returning its
    /// platform id if the platform returns one synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Auth`] on credential rejection,
    /// [`ArchiveError::Transient`] on a network failure.
    async fn upload_new(
        &self,
        path: &str,
        meta: &SubmissionRequest,
    ) -> Result<Option<String>, ArchiveError>;

    /// Appends `path` as an additional part to `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Auth`] on credential rejection,
    /// [`ArchiveError::Transient`] on a network failure.
    async fn append_part(
        &self,
        path: &str,
        parent_id: &str,
        cdn: Option<&str>,
        part_name: &str,
    ) -> Result<(), ArchiveError>;

    /// Queries the platform's submission feed for entries in the given
    /// status set, returning a map of exact title to parent id.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Transient`] on a network failure.
    async fn feed(
        &self,
        size: u32,
        status_set: &[&str],
    ) -> Result<HashMap<String, String>, ArchiveError>;
}
