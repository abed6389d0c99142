// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Post-processing handoff between C7's finalized segment pairs and
//! C9's upload-staging directory.
//!
//! The subtitle conversion and the actual encode are opaque external
//! collaborators (§1, §6): this module only discovers which segment
//! pairs are ready and drives whatever [`VideoPostProcessor`] the
//! caller wires in. What that implementation does internally -
//! shelling out to a subtitle converter and a transcoder, or skipping
//! straight to a copy when encoding is disabled - is not this crate's
//! concern.

use archivekit_core::ArchiveError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;

/// One finalized (non-`.part`) segment pair found in the processing
/// folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySegment {
    pub base: String,
    pub flv_path: PathBuf,
    pub xml_path: PathBuf,
}

/// Produces the final, stageable media file for one recorded segment.
#[async_trait]
pub trait VideoPostProcessor: Send + Sync {
    /// Encodes `segment` into a file under the upload-staging
    /// directory whose name carries `segment.base`'s embedded
    /// timestamp, so C9 can parse it back out.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Transient`] or [`ArchiveError::Data`]
    /// depending on the nature of the encoding failure; the caller
    /// logs and continues with the next segment either way.
    async fn process(&self, segment: &ReadySegment) -> Result<PathBuf, ArchiveError>;
}

/// Scans `processing_folder` for `{base}.flv`/`{base}.xml` pairs with
/// no `.part` suffix on either half.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] if the directory cannot be read.
pub async fn discover_ready_segments(processing_folder: &str) -> Result<Vec<ReadySegment>, ArchiveError> {
    let mut entries = tokio::fs::read_dir(processing_folder).await.map_err(ArchiveError::Io)?;
    let mut flv_bases = HashSet::new();
    let mut xml_bases = HashSet::new();

    while let Some(entry) = entries.next_entry().await.map_err(ArchiveError::Io)? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if let Some(base) = name.strip_suffix(".flv") {
            flv_bases.insert(base.to_string());
        } else if let Some(base) = name.strip_suffix(".xml") {
            xml_bases.insert(base.to_string());
        }
    }

    let mut ready: Vec<ReadySegment> = flv_bases
        .intersection(&xml_bases)
        .map(|base| ReadySegment {
            base: base.clone(),
            flv_path: PathBuf::from(processing_folder).join(format!("{base}.flv")),
            xml_path: PathBuf::from(processing_folder).join(format!("{base}.xml")),
        })
        .collect();
    ready.sort_by(|a, b| a.base.cmp(&b.base));
    Ok(ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovers_only_complete_non_part_pairs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let write = |name: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"x").expect("write");
        };
        write("S录播2026-02-24T10_00_00.flv");
        write("S录播2026-02-24T10_00_00.xml");
        write("S录播2026-02-24T11_00_00.flv.part");
        write("S录播2026-02-24T11_00_00.xml");
        write("S录播2026-02-24T12_00_00.flv");

        let found = discover_ready_segments(dir.path().to_str().expect("utf8")).await.expect("scan");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].base, "S录播2026-02-24T10_00_00");
    }
}
