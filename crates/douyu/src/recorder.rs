// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Transcoder child-process supervisor (C4).
//!
//! Launches the external transcoder in byte-copy mode with a hard
//! duration cap, captures stderr into a bounded ring buffer, and
//! enforces a graceful-then-forceful shutdown on stop requests.

use archivekit_core::ArchiveError;
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

const STDERR_RING_CAPACITY: usize = 200;
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one recording run.
#[derive(Debug)]
pub struct RecordingOutcome {
    pub exit_code: Option<i32>,
    pub stderr_tail: Vec<String>,
}

/// Spawns the configured transcoder binary and supervises it for one
/// segment.
pub struct Recorder {
    transcoder_path: String,
    extra_env: Vec<(String, String)>,
}

impl Recorder {
    #[must_use]
    pub fn new(transcoder_path: String, extra_env: Vec<(String, String)>) -> Self {
        Self { transcoder_path, extra_env }
    }

    /// Launches the transcoder, capped at `duration_seconds`, writing
    /// to `out_path` (must end in `.part`). Returns a handle the caller
    /// awaits to completion, or requests a stop on.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if the child process cannot be
    /// spawned, or [`ArchiveError::Fatal`] if `out_path` does not end
    /// in `.part`.
    pub fn spawn(
        &self,
        url: &str,
        headers: &[(String, String)],
        out_path: &str,
        duration_seconds: u64,
    ) -> Result<RecordingHandle, ArchiveError> {
        if !out_path.ends_with(".part") {
            return Err(ArchiveError::Fatal(format!("recorder output path must end in .part: {out_path}")));
        }

        let header_value = headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("\r\n");

        let mut command = Command::new(&self.transcoder_path);
        command
            .envs(self.extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .args(["-headers", &header_value])
            .args(["-i", url])
            .args(["-t", &duration_seconds.to_string()])
            .args(["-c", "copy", "-y", out_path])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(ArchiveError::Io)?;
        let stderr = child.stderr.take();
        let stderr_task = stderr.map(|stderr| {
            tokio::spawn(async move { collect_stderr_ring(stderr).await })
        });

        Ok(RecordingHandle { child, stderr_task })
    }
}

/// A running transcoder process, awaitable to exit or stoppable.
pub struct RecordingHandle {
    child: Child,
    stderr_task: Option<tokio::task::JoinHandle<Vec<String>>>,
}

impl RecordingHandle {
    /// Awaits natural exit of the child process.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if waiting on the child fails.
    pub async fn wait(mut self) -> Result<RecordingOutcome, ArchiveError> {
        let status = self.child.wait().await.map_err(ArchiveError::Io)?;
        let stderr_tail = self.collect_stderr().await;
        Ok(RecordingOutcome { exit_code: status.code(), stderr_tail })
    }

    /// Requests a graceful stop: SIGTERM, wait up to 10s, then kill.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if signalling or killing the child
    /// fails.
    pub async fn stop(mut self) -> Result<RecordingOutcome, ArchiveError> {
        terminate(&self.child).await;

        let exit_code = match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, self.child.wait()).await
        {
            Ok(Ok(status)) => status.code(),
            Ok(Err(err)) => return Err(ArchiveError::Io(err)),
            Err(_) => {
                self.child.kill().await.map_err(ArchiveError::Io)?;
                self.child.wait().await.ok().and_then(|status| status.code())
            },
        };

        let stderr_tail = self.collect_stderr().await;
        Ok(RecordingOutcome { exit_code, stderr_tail })
    }

    async fn collect_stderr(&mut self) -> Vec<String> {
        match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Waits for natural exit, a `deadline` elapsing, or `stop_rx`
    /// firing, whichever comes first. In the latter two cases this
    /// performs the same graceful-then-forceful shutdown as [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if signalling, killing, or waiting
    /// on the child fails.
    pub async fn wait_with_deadline(
        mut self,
        deadline: Duration,
        mut stop_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<RecordingOutcome, ArchiveError> {
        let status = tokio::select! {
            status = self.child.wait() => Some(status),
            () = tokio::time::sleep(deadline) => None,
            _ = &mut stop_rx => None,
        };

        let exit_code = match status {
            Some(status) => status.map_err(ArchiveError::Io)?.code(),
            None => {
                terminate(&self.child).await;
                match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, self.child.wait()).await {
                    Ok(Ok(status)) => status.code(),
                    Ok(Err(err)) => return Err(ArchiveError::Io(err)),
                    Err(_) => {
                        self.child.kill().await.map_err(ArchiveError::Io)?;
                        self.child.wait().await.ok().and_then(|status| status.code())
                    },
                }
            },
        };

        let stderr_tail = self.collect_stderr().await;
        Ok(RecordingOutcome { exit_code, stderr_tail })
    }
}

#[cfg(unix)]
async fn terminate(child: &Child) {
    // No libc/nix dependency in this workspace; shell out to `kill` for SIGTERM.
    if let Some(pid) = child.id() {
        let _ = Command::new("kill").args(["-TERM", &pid.to_string()]).status().await;
    }
}

#[cfg(not(unix))]
async fn terminate(_child: &Child) {}

async fn collect_stderr_ring(stderr: tokio::process::ChildStderr) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut ring: VecDeque<String> = VecDeque::with_capacity(STDERR_RING_CAPACITY);
    while let Ok(Some(line)) = lines.next_line().await {
        if ring.len() == STDERR_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(line);
    }
    ring.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_output_path_without_part_suffix() {
        let recorder = Recorder::new("true".to_string(), vec![]);
        let result = recorder.spawn("rtmp://example/live", &[], "/tmp/out.flv", 5);
        assert!(matches!(result, Err(ArchiveError::Fatal(_))));
    }

    #[tokio::test]
    async fn spawns_and_waits_for_exit() {
        let recorder = Recorder::new("true".to_string(), vec![]);
        let handle = recorder.spawn("ignored", &[], "/tmp/out.flv.part", 1).expect("spawn");
        let outcome = handle.wait().await.expect("wait");
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn stop_terminates_a_long_running_child() {
        // A fake transcoder that ignores every flag we pass and just sleeps,
        // so the recorder's spawn() argument list doesn't matter here.
        let dir = tempfile::tempdir().expect("tempdir");
        let script_path = dir.path().join("fake_transcoder.sh");
        tokio::fs::write(&script_path, "#!/bin/sh\nsleep 30\n").await.expect("write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(&script_path).await.expect("metadata").permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(&script_path, perms).await.expect("chmod");
        }

        let recorder = Recorder::new(script_path.to_string_lossy().into_owned(), vec![]);
        let handle = recorder.spawn("ignored", &[], "/tmp/out.flv.part", 9999).expect("spawn");
        let outcome = handle.stop().await.expect("stop");
        assert_ne!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn wait_with_deadline_returns_natural_exit_before_deadline() {
        let recorder = Recorder::new("true".to_string(), vec![]);
        let handle = recorder.spawn("ignored", &[], "/tmp/out.flv.part", 1).expect("spawn");
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let outcome = handle.wait_with_deadline(Duration::from_secs(30), rx).await.expect("wait");
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn wait_with_deadline_kills_on_deadline_elapsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script_path = dir.path().join("fake_transcoder.sh");
        tokio::fs::write(&script_path, "#!/bin/sh\nsleep 30\n").await.expect("write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(&script_path).await.expect("metadata").permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(&script_path, perms).await.expect("chmod");
        }

        let recorder = Recorder::new(script_path.to_string_lossy().into_owned(), vec![]);
        let handle = recorder.spawn("ignored", &[], "/tmp/out.flv.part", 9999).expect("spawn");
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let outcome = handle.wait_with_deadline(Duration::from_millis(50), rx).await.expect("wait");
        assert_ne!(outcome.exit_code, Some(0));
    }
}
