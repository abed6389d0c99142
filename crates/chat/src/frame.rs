// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Binary chat-frame codec (C1).
//!
//! The source chat protocol frames a flat key-value payload as
//! `payload + 0x00` and carries the payload as a sequence of
//! `key@=value/` tokens. Two characters are escaped inside values:
//! `@` becomes `@A` and `/` becomes `@S`.

use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;

/// Escapes `@` and `/` in a value so it can be embedded in a payload
/// token without being mistaken for a delimiter.
#[must_use]
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '@' => out.push_str("@A"),
            '/' => out.push_str("@S"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape`]. Any `@` not followed by `A` or `S` is passed
/// through literally rather than treated as an error, since malformed
/// escapes should degrade gracefully (§7, `Data` errors are
/// skip-and-count, not abort).
#[must_use]
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '@' {
            match chars.peek() {
                Some('A') => {
                    out.push('@');
                    chars.next();
                },
                Some('S') => {
                    out.push('/');
                    chars.next();
                },
                _ => out.push('@'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Encodes a flat key-value map into a `key@=value/` payload. Iteration
/// order is not stable and callers must not rely on it.
#[must_use]
pub fn encode(map: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        out.push_str(key);
        out.push_str("@=");
        out.push_str(&escape(value));
        out.push('/');
    }
    out
}

/// Parses a `key@=value/` payload into a flat key-value map. Tokens
/// without a `@=` separator are ignored rather than rejected (§7: `Data`
/// errors are counted and skipped).
#[must_use]
pub fn parse(payload: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for token in payload.split('/') {
        if token.is_empty() {
            continue;
        }
        if let Some(sep) = token.find("@=") {
            let key = &token[..sep];
            let raw_value = &token[sep + 2..];
            map.insert(key.to_string(), unescape(raw_value));
        }
    }
    map
}

/// Frames a payload for the wire: `payload + 0x00`.
#[must_use]
pub fn pack(payload: &str) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 1);
    out.put_slice(payload.as_bytes());
    out.put_u8(0);
    out
}

/// Consumes zero or more concatenated, NUL-terminated payloads from the
/// front of `buffer`, returning them as UTF-8 strings. Bytes after the
/// last NUL (a partial frame still arriving) are left untouched in
/// `buffer` so the caller can append more data and call again.
///
/// Frames whose bytes are not valid UTF-8 are skipped and counted via
/// the returned `malformed` count rather than aborting the stream.
pub fn iter_payloads(buffer: &mut BytesMut) -> (Vec<String>, usize) {
    let mut payloads = Vec::new();
    let mut malformed = 0usize;
    loop {
        let Some(nul_pos) = buffer.iter().position(|&b| b == 0) else {
            break;
        };
        let frame = buffer.split_to(nul_pos);
        buffer.advance(1); // drop the NUL terminator itself
        match std::str::from_utf8(&frame) {
            Ok(text) => payloads.push(text.to_string()),
            Err(_) => malformed += 1,
        }
    }
    (payloads, malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_unescape_round_trip_on_special_chars() {
        let value = "a@b/c@@d//e";
        assert_eq!(unescape(&escape(value)), value);
    }

    #[test]
    fn escape_unescape_round_trip_arbitrary_utf8() {
        let samples = ["hello world", "弹幕测试", "", "@", "/", "@@//", "emoji 🎉 here"];
        for sample in samples {
            assert_eq!(unescape(&escape(sample)), sample, "round-trip failed for {sample:?}");
        }
    }

    #[test]
    fn unescape_tolerates_bare_at_sign() {
        assert_eq!(unescape("a@b"), "a@b");
    }

    #[test]
    fn parse_encode_round_trip() {
        let mut map = HashMap::new();
        map.insert("type".to_string(), "chatmsg".to_string());
        map.insert("txt".to_string(), "hello/world@here".to_string());
        map.insert("rid".to_string(), "12345".to_string());

        let payload = encode(&map);
        let parsed = parse(&payload);
        assert_eq!(parsed, map);
    }

    #[test]
    fn parse_ignores_tokens_without_separator() {
        let parsed = parse("type@=chatmsg/garbage/rid@=1/");
        assert_eq!(parsed.get("type").map(String::as_str), Some("chatmsg"));
        assert_eq!(parsed.get("rid").map(String::as_str), Some("1"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn parse_missing_key_reads_as_absent() {
        let parsed = parse("type@=chatmsg/");
        assert_eq!(parsed.get("nonexistent"), None);
    }

    #[test]
    fn pack_and_iter_payloads_single_frame() {
        let payload = "type@=chatmsg/";
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&pack(payload));

        let (payloads, malformed) = iter_payloads(&mut buffer);
        assert_eq!(payloads, vec![payload.to_string()]);
        assert_eq!(malformed, 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn iter_payloads_handles_multiple_concatenated_frames() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&pack("a@=1/"));
        buffer.extend_from_slice(&pack("b@=2/"));

        let (payloads, malformed) = iter_payloads(&mut buffer);
        assert_eq!(payloads, vec!["a@=1/".to_string(), "b@=2/".to_string()]);
        assert_eq!(malformed, 0);
    }

    #[test]
    fn iter_payloads_is_safe_on_partial_input() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&pack("complete@=1/"));
        buffer.extend_from_slice(b"partial_without_terminator");

        let (payloads, _) = iter_payloads(&mut buffer);
        assert_eq!(payloads, vec!["complete@=1/".to_string()]);
        assert_eq!(buffer.as_ref(), b"partial_without_terminator");

        // Completing the partial frame on a later call picks it up.
        buffer.put_u8(0);
        let (payloads, _) = iter_payloads(&mut buffer);
        assert_eq!(payloads, vec!["partial_without_terminator".to_string()]);
        assert!(buffer.is_empty());
    }
}
