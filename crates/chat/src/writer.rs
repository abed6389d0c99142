// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Streaming, append-only XML chat-log writer (C2).
//!
//! Produces a document consumable by the external subtitle converter:
//! each message is a `<d>` leaf with a composite `p` attribute
//! (`offset,mode,size,color,timestamp,pool,user,rowid`) and body text
//! equal to the message text.

use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

const ROOT_OPEN: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<i>\n";
const ROOT_CLOSE: &str = "</i>\n";
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Errors raised by the chat-log writer. Every variant wraps an I/O
/// failure; there is no other way for this type to fail.
#[derive(Debug, Error)]
pub enum ChatLogError {
    #[error("failed to open chat log at {path}: {source}")]
    Open { path: String, #[source] source: std::io::Error },
    #[error("failed to write chat log: {0}")]
    Write(#[from] std::io::Error),
}

/// Escapes the five characters strict XML requires escaping.
#[must_use]
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// A single buffered, append-only chat-log XML writer bound to one
/// segment's `.xml.part` file.
pub struct ChatLogWriter {
    file: File,
    buffer: String,
    last_flush: Instant,
    flush_interval: Duration,
    next_rowid: u64,
}

impl ChatLogWriter {
    /// Truncates (or creates) `path`, writes the XML declaration and
    /// root opening tag, and flushes to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ChatLogError::Open`] if the file cannot be created, or
    /// [`ChatLogError::Write`] if the initial flush fails.
    pub async fn open(path: &str) -> Result<Self, ChatLogError> {
        let mut file = File::create(path)
            .await
            .map_err(|source| ChatLogError::Open { path: path.to_string(), source })?;
        file.write_all(ROOT_OPEN.as_bytes()).await?;
        file.flush().await?;
        tracing::debug!(path, "opened chat log writer");
        Ok(Self {
            file,
            buffer: String::new(),
            last_flush: Instant::now(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            next_rowid: 1,
        })
    }

    /// Appends one message element to the buffer, flushing to disk if
    /// at least [`DEFAULT_FLUSH_INTERVAL`] has elapsed since the last
    /// flush. Safe to call at high rate.
    ///
    /// # Errors
    ///
    /// Returns [`ChatLogError::Write`] if a periodic flush fails.
    pub async fn write(
        &mut self,
        offset_seconds: f64,
        text: &str,
        mode: u8,
        size: u16,
        color: u32,
        user: &str,
    ) -> Result<(), ChatLogError> {
        let timestamp = chrono::Utc::now().timestamp();
        let rowid = self.next_rowid;
        self.next_rowid += 1;

        self.buffer.push_str(&format!(
            "<d p=\"{offset_seconds:.3},{mode},{size},{color:#08X},{timestamp},0,{user},{rowid}\">{}</d>\n",
            xml_escape(text),
        ));

        if self.last_flush.elapsed() >= self.flush_interval {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ChatLogError> {
        if !self.buffer.is_empty() {
            self.file.write_all(self.buffer.as_bytes()).await?;
            self.buffer.clear();
        }
        self.file.flush().await?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Writes any buffered elements, the closing root tag, and fsyncs.
    /// Leaves a well-formed XML document.
    ///
    /// # Errors
    ///
    /// Returns [`ChatLogError::Write`] if the final write or sync fails.
    pub async fn close(mut self) -> Result<(), ChatLogError> {
        self.flush().await?;
        self.file.write_all(ROOT_CLOSE.as_bytes()).await?;
        self.file.flush().await?;
        self.file.sync_all().await?;
        tracing::debug!(rowid_count = self.next_rowid - 1, "closed chat log writer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(name);
        // Leak the tempdir for the duration of the test process; fine for short-lived tests.
        std::mem::forget(dir);
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn xml_escape_covers_all_five_characters() {
        assert_eq!(xml_escape("&<>\"'"), "&amp;&lt;&gt;&quot;&apos;");
    }

    #[tokio::test]
    async fn open_write_close_produces_well_formed_document() {
        let path = temp_path("chat.xml");
        let mut writer = ChatLogWriter::open(&path).await.expect("open");
        writer.write(0.5, "hello", 1, 25, 0xFFFFFF, "alice").await.expect("write");
        writer.write(12.75, "<script>&bad</script>", 1, 25, 0xFF0000, "bob").await.expect("write");
        writer.close().await.expect("close");

        let contents = tokio::fs::read_to_string(&path).await.expect("read back");
        assert!(contents.starts_with("<?xml"));
        assert!(contents.trim_end().ends_with("</i>"));
        assert!(contents.contains("&lt;script&gt;&amp;bad&lt;/script&gt;"));
        assert!(roxmltree::Document::parse(&contents).is_ok());
    }

    #[tokio::test]
    async fn manual_close_after_prefix_is_still_parseable() {
        let path = temp_path("chat_prefix.xml");
        let mut writer = ChatLogWriter::open(&path).await.expect("open");
        writer.write(1.0, "first message", 1, 25, 0xFFFFFF, "carl").await.expect("write");
        // Force the buffered element to disk without calling close(), to emulate a
        // process interrupted right after an element boundary.
        writer.flush().await.expect("flush");
        drop(writer);

        let mut contents = tokio::fs::read_to_string(&path).await.expect("read back");
        contents.push_str(ROOT_CLOSE);
        assert!(roxmltree::Document::parse(&contents).is_ok());
    }
}
