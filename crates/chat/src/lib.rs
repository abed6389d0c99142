// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! ArchiveKit Chat - binary chat-frame codec and streaming XML
//! chat-log writer.
//!
//! - [`frame`]: the wire codec for the source chat protocol.
//! - [`writer`]: the append-only `.xml.part` chat-log writer consumed
//!   by the chat collector.

pub mod frame;
pub mod writer;

pub use writer::{ChatLogError, ChatLogWriter};
