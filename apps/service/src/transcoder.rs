// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A `VideoPostProcessor` that shells out to the two opaque external
//! collaborators §1/§6 name: the XML-to-subtitle converter and the
//! transcoder (ffmpeg) used to mux the recorded segment with its
//! rendered subtitles. Mirrors `archivekit-douyu::recorder::Recorder`'s
//! own child-process supervision shape (spawn, wait, map exit code),
//! since this is the same "run an external binary to completion"
//! pattern applied to the post-processing stage instead of the live
//! recording stage.

use archivekit_core::ArchiveError;
use archivekit_engine::{ReadySegment, VideoPostProcessor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

pub struct FfmpegPostProcessor {
    transcoder_path: String,
    subtitle_converter_path: String,
    staging_folder: String,
    output_extension: String,
    skip_encoding: bool,
}

impl FfmpegPostProcessor {
    #[must_use]
    pub const fn new(
        transcoder_path: String,
        subtitle_converter_path: String,
        staging_folder: String,
        output_extension: String,
        skip_encoding: bool,
    ) -> Self {
        Self { transcoder_path, subtitle_converter_path, staging_folder, output_extension, skip_encoding }
    }

    async fn run_to_completion(mut command: Command, step: &str) -> Result<(), ArchiveError> {
        let status = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(ArchiveError::Io)?;
        if status.success() {
            Ok(())
        } else {
            Err(ArchiveError::Transient(format!("{step} exited with {status}")))
        }
    }
}

#[async_trait]
impl VideoPostProcessor for FfmpegPostProcessor {
    async fn process(&self, segment: &ReadySegment) -> Result<PathBuf, ArchiveError> {
        let output_path = PathBuf::from(&self.staging_folder).join(format!("{}.{}", segment.base, self.output_extension));

        if self.skip_encoding {
            tokio::fs::copy(&segment.flv_path, &output_path).await.map_err(ArchiveError::Io)?;
            return Ok(output_path);
        }

        let subtitle_path = segment.xml_path.with_extension("ass");
        let mut convert = Command::new(&self.subtitle_converter_path);
        convert.arg(&segment.xml_path).arg(&subtitle_path);
        Self::run_to_completion(convert, "subtitle converter").await?;

        let subtitle_filter = format!("subtitles={}", subtitle_path.display());
        let mut mux = Command::new(&self.transcoder_path);
        mux.args(["-i"])
            .arg(&segment.flv_path)
            .args(["-vf", &subtitle_filter, "-c:a", "copy", "-y"])
            .arg(&output_path);
        Self::run_to_completion(mux, "transcoder").await?;

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skip_encoding_copies_flv_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flv = dir.path().join("S录播2026-02-24T10_00_00.flv");
        tokio::fs::write(&flv, b"video-bytes").await.expect("write");
        let xml = dir.path().join("S录播2026-02-24T10_00_00.xml");
        tokio::fs::write(&xml, b"<i></i>").await.expect("write");

        let processor = FfmpegPostProcessor::new(
            "ffmpeg".to_string(),
            "subconv".to_string(),
            dir.path().to_str().expect("utf8").to_string(),
            "flv".to_string(),
            true,
        );
        let segment = ReadySegment {
            base: "S录播2026-02-24T10_00_00".to_string(),
            flv_path: flv.clone(),
            xml_path: xml,
        };

        let output = processor.process(&segment).await.expect("process");
        assert_eq!(tokio::fs::read(&output).await.expect("read"), b"video-bytes");
    }
}
