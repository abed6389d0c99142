// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error taxonomy shared across the archive pipeline.
//!
//! Every crate in the workspace converts its local errors into
//! [`ArchiveError`] at its public boundary so callers can match on a
//! single, small set of categories instead of each crate's internal
//! representation.

use thiserror::Error;

/// Top-level error category for the archive pipeline.
///
/// Each variant corresponds to one of the error-policy buckets: the
/// policy for handling a given failure is determined entirely by
/// which variant it is, never by inspecting the message.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Network timeouts, 5xx responses, WebSocket drops. Bounded retry
    /// with backoff is the policy at the point of occurrence; this
    /// variant is what escapes once that budget is exhausted.
    #[error("transient error: {0}")]
    Transient(String),

    /// Login check failed, or the upload platform rejected a call for
    /// credential reasons. Never retried automatically.
    #[error("auth error: {0}")]
    Auth(String),

    /// Stream URL resolution exhausted its retry budget.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Chat collector reconnect budget exhausted; video recording
    /// continues without live chat.
    #[error("degraded: {0}")]
    Degraded(String),

    /// Malformed chat frames, unparseable filenames, or other
    /// skip-and-count data issues.
    #[error("data error: {0}")]
    Data(String),

    /// Database unreachable, required configuration missing. Fails
    /// fast at startup; logged and isolated to one streamer afterward.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// I/O error that doesn't fit a more specific category.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results using [`ArchiveError`].
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<ArchiveError> for String {
    fn from(err: ArchiveError) -> Self {
        err.to_string()
    }
}
