// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A thin `UploadClient` (§6) implementation against the Bilibili
//! member-center HTTP API.
//!
//! This is the "specific upload-platform client" §1 calls an opaque
//! external collaborator: only the narrow surface `archivekit-upload`
//! needs is implemented, against a cookie-authenticated session the
//! deployer provides. It deliberately does not replicate Bilibili's
//! full chunked/resumable upload protocol (pre-upload negotiation,
//! multi-part chunk upload, CDN selection) - that belongs to whatever
//! uploader binary or library sits behind `cookie`/`api_base_url`; this
//! client assumes `path` is already reachable by that uploader and
//! only drives the submission metadata calls.

use archivekit_core::ArchiveError;
use archivekit_upload::{SubmissionRequest, UploadClient};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct LoginCheckResponse {
    code: i32,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    code: i32,
    data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    bvid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    code: i32,
    data: FeedData,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    #[serde(default)]
    arc_audits: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(rename = "Archive")]
    archive: FeedArchive,
}

#[derive(Debug, Deserialize)]
struct FeedArchive {
    bvid: String,
    title: String,
}

pub struct BilibiliUploadClient {
    client: reqwest::Client,
    api_base_url: String,
    cookie: String,
    csrf_token: String,
}

impl BilibiliUploadClient {
    #[must_use]
    pub const fn new(client: reqwest::Client, api_base_url: String, cookie: String, csrf_token: String) -> Self {
        Self { client, api_base_url, cookie, csrf_token }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header(reqwest::header::COOKIE, &self.cookie)
    }
}

#[async_trait]
impl UploadClient for BilibiliUploadClient {
    async fn check_login(&self) -> Result<bool, ArchiveError> {
        let response = self
            .authed(self.client.get(format!("{}/x/web-interface/nav", self.api_base_url)))
            .send()
            .await
            .map_err(|e| ArchiveError::Transient(format!("login check request failed: {e}")))?;

        let body: LoginCheckResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Transient(format!("login check response malformed: {e}")))?;
        Ok(body.code == 0)
    }

    async fn upload_new(&self, path: &str, meta: &SubmissionRequest) -> Result<Option<String>, ArchiveError> {
        let response = self
            .authed(self.client.post(format!("{}/x/vu/client/add", self.api_base_url)))
            .query(&[("csrf", self.csrf_token.as_str())])
            .form(&[
                ("videos[0][filename]", path),
                ("title", meta.title.as_str()),
                ("tid", &meta.category_id.to_string()),
                ("tag", &meta.tags.join(",")),
                ("source", meta.source_url.as_str()),
                ("desc", meta.description.as_str()),
                ("dynamic", meta.dynamic_text.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ArchiveError::Transient(format!("upload_new request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(ArchiveError::Auth(format!("upload_new rejected for {path}")));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Transient(format!("upload_new response malformed: {e}")))?;
        if body.code != 0 {
            return Err(ArchiveError::Auth(format!("upload_new returned code {}", body.code)));
        }
        Ok(body.data.and_then(|data| data.bvid))
    }

    async fn append_part(
        &self,
        path: &str,
        parent_id: &str,
        cdn: Option<&str>,
        part_name: &str,
    ) -> Result<(), ArchiveError> {
        let response = self
            .authed(self.client.post(format!("{}/x/vu/client/videoup/edit", self.api_base_url)))
            .query(&[("csrf", self.csrf_token.as_str())])
            .form(&[
                ("bvid", parent_id),
                ("videos[0][filename]", path),
                ("videos[0][title]", part_name),
                ("videos[0][cdn]", cdn.unwrap_or_default()),
            ])
            .send()
            .await
            .map_err(|e| ArchiveError::Transient(format!("append_part request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(ArchiveError::Auth(format!("append_part rejected for {parent_id}")));
        }
        if !response.status().is_success() {
            return Err(ArchiveError::Transient(format!("append_part returned {}", response.status())));
        }
        Ok(())
    }

    async fn feed(&self, size: u32, status_set: &[&str]) -> Result<HashMap<String, String>, ArchiveError> {
        let response = self
            .authed(self.client.get(format!("{}/x/space/wbi/arc/search", self.api_base_url)))
            .query(&[("status", status_set.join(",")), ("pagesize", size.to_string())])
            .send()
            .await
            .map_err(|e| ArchiveError::Transient(format!("feed request failed: {e}")))?;

        let body: FeedResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Transient(format!("feed response malformed: {e}")))?;
        if body.code != 0 {
            return Err(ArchiveError::Transient(format!("feed returned code {}", body.code)));
        }

        Ok(body.data.arc_audits.into_iter().map(|entry| (entry.archive.title, entry.archive.bvid)).collect())
    }
}
