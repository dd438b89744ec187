//! Per-channel capture buffers.
//!
//! A [`StreamBuffer`] holds the raw bytes one output channel produced. Bytes
//! are kept as written, so non-UTF-8 output survives capture intact; callers
//! that want text use [`StreamBuffer::to_string_lossy`]. Only the supervisor
//! can append; once a buffer leaves [`crate::supervisor::run`] it is frozen.

use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

/// One of the two captured output channels of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stdout => f.write_str("stdout"),
            Channel::Stderr => f.write_str("stderr"),
        }
    }
}

/// Bytes captured from one channel, in the order the child wrote them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamBuffer {
    bytes: Vec<u8>,
}

impl StreamBuffer {
    pub(crate) fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode as UTF-8, replacing invalid sequences with `U+FFFD`.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Display for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

// Serialised as text: the tool's output is human-readable diagnostics.
impl Serialize for StreamBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

/// A read error on one channel.
///
/// Non-fatal: the channel is treated as closed and capture continues on the
/// other one, so the invocation still reports whatever was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReadError {
    pub channel: Channel,
    pub detail: String,
}

impl fmt::Display for ChannelReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partial read on {}: {}", self.channel, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_write_order() {
        let mut buf = StreamBuffer::default();
        buf.append(b"hello ");
        buf.append(b"");
        buf.append(b"world\n");
        assert_eq!(buf.as_bytes(), b"hello world\n");
        assert_eq!(buf.len(), 12);
        assert!(!buf.is_empty());
    }

    #[test]
    fn lossy_text_replaces_invalid_utf8() {
        let mut buf = StreamBuffer::default();
        buf.append(&[b'o', b'k', 0xff]);
        assert_eq!(buf.to_string_lossy(), "ok\u{FFFD}");
        // Raw bytes stay untouched.
        assert_eq!(buf.into_bytes(), vec![b'o', b'k', 0xff]);
    }

    #[test]
    fn serialises_as_string() {
        let mut buf = StreamBuffer::default();
        buf.append(b"converted\n");
        let json = serde_json::to_value(&buf).unwrap();
        assert_eq!(json, serde_json::json!("converted\n"));
    }

    #[test]
    fn read_error_display_names_channel() {
        let e = ChannelReadError {
            channel: Channel::Stderr,
            detail: "broken pipe".into(),
        };
        assert_eq!(e.to_string(), "partial read on stderr: broken pipe");
    }
}
