//! Record framing and the incremental splitter.

use bytes::{Bytes, BytesMut};

/// How a complete record is interpreted once split out of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Server-Sent Events: `event`, `data`, `id` and `retry` fields.
    Sse,
    /// One JSON value per record.
    NdJson,
    /// Caller-defined parts and key/value pairs.
    Custom,
}

/// Separators used to split raw bytes into records, parts and key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    pub format: Format,
    pub record_separator: String,
    pub part_separator: Option<String>,
    pub key_value_separator: Option<String>,
}

impl Framing {
    pub fn sse() -> Self {
        Self {
            format: Format::Sse,
            record_separator: "\n\n".to_string(),
            part_separator: Some("\n".to_string()),
            key_value_separator: Some(":".to_string()),
        }
    }

    pub fn ndjson() -> Self {
        Self {
            format: Format::NdJson,
            record_separator: "\n".to_string(),
            part_separator: None,
            key_value_separator: None,
        }
    }

    pub fn custom(record_separator: impl Into<String>) -> Self {
        Self {
            format: Format::Custom,
            record_separator: record_separator.into(),
            part_separator: None,
            key_value_separator: None,
        }
    }

    pub fn with_part_separator(mut self, separator: impl Into<String>) -> Self {
        self.part_separator = Some(separator.into());
        self
    }

    pub fn with_key_value_separator(mut self, separator: impl Into<String>) -> Self {
        self.key_value_separator = Some(separator.into());
        self
    }
}

impl Default for Framing {
    fn default() -> Self {
        Self::sse()
    }
}

/// Accumulates bytes and hands out complete records.
///
/// Records are cut on the raw byte separator, so a separator or a UTF-8
/// sequence split across two pushes is reassembled before it is looked at.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    separator: Vec<u8>,
    // Bytes before this offset are known not to start a separator.
    scanned: usize,
}

impl FrameBuffer {
    pub fn new(separator: &str) -> Self {
        Self {
            buffer: BytesMut::new(),
            separator: separator.as_bytes().to_vec(),
            scanned: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete record, without its separator.
    pub fn next_record(&mut self) -> Option<Bytes> {
        let sep_len = self.separator.len();
        if sep_len == 0 {
            if self.buffer.is_empty() {
                return None;
            }
            return Some(self.buffer.split().freeze());
        }

        let found = self.buffer[self.scanned..]
            .windows(sep_len)
            .position(|window| window == self.separator.as_slice())
            .map(|offset| offset + self.scanned);

        match found {
            Some(index) => {
                let record = self.buffer.split_to(index).freeze();
                let _ = self.buffer.split_to(sep_len);
                self.scanned = 0;
                Some(record)
            }
            None => {
                self.scanned = self.buffer.len().saturating_sub(sep_len - 1);
                None
            }
        }
    }

    /// Remaining bytes at end of stream, if any.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Rewrites `\r\n` and lone `\r` line endings to `\n`.
///
/// A `\r` ending one push is remembered, so a `\n` opening the next push
/// is folded into it.
#[derive(Debug, Default)]
pub struct LineEndings {
    after_cr: bool,
}

impl LineEndings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, chunk: Bytes) -> Bytes {
        if !self.after_cr && !chunk.contains(&b'\r') {
            return chunk;
        }

        let mut out = BytesMut::with_capacity(chunk.len());
        for &byte in chunk.iter() {
            if self.after_cr && byte == b'\n' {
                self.after_cr = false;
                continue;
            }
            self.after_cr = byte == b'\r';
            out.extend_from_slice(&[if self.after_cr { b'\n' } else { byte }]);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut FrameBuffer) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(record) = buffer.next_record() {
            out.push(String::from_utf8(record.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn test_splits_complete_records() {
        let mut buffer = FrameBuffer::new("\n\n");
        buffer.push(b"data: a\n\ndata: b\n\ndata: c");
        assert_eq!(drain(&mut buffer), vec!["data: a", "data: b"]);
        assert_eq!(buffer.finish().as_deref(), Some(&b"data: c"[..]));
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_separator_split_across_pushes() {
        let mut buffer = FrameBuffer::new("\n\n");
        buffer.push(b"data: a\n");
        assert!(buffer.next_record().is_none());
        buffer.push(b"\ndata: b");
        assert_eq!(drain(&mut buffer), vec!["data: a"]);
    }

    #[test]
    fn test_every_split_point_yields_same_records() {
        let input = "one||two||three||";
        for cut in 0..=input.len() {
            let mut buffer = FrameBuffer::new("||");
            buffer.push(&input.as_bytes()[..cut]);
            let mut records = drain(&mut buffer);
            buffer.push(&input.as_bytes()[cut..]);
            records.extend(drain(&mut buffer));
            assert_eq!(records, vec!["one", "two", "three"], "cut at {cut}");
            assert!(buffer.finish().is_none());
        }
    }

    #[test]
    fn test_multibyte_separator_and_text() {
        let mut buffer = FrameBuffer::new("§");
        let input = "héllo§wörld§".as_bytes();
        for byte in input {
            buffer.push(std::slice::from_ref(byte));
        }
        assert_eq!(drain(&mut buffer), vec!["héllo", "wörld"]);
    }

    #[test]
    fn test_line_endings_fold_crlf_across_pushes() {
        let mut endings = LineEndings::new();
        let mut out = Vec::new();
        for part in ["a\r", "\nb\r\r", "\nc\n", "\r\n"] {
            out.extend_from_slice(&endings.normalize(Bytes::from_static(part.as_bytes())));
        }
        assert_eq!(out, b"a\nb\n\nc\n\n");
    }

    #[test]
    fn test_line_endings_pass_plain_chunks_through() {
        let mut endings = LineEndings::new();
        let chunk = Bytes::from_static(b"data: x\n\n");
        assert_eq!(endings.normalize(chunk.clone()), chunk);
    }

    #[test]
    fn test_default_framings() {
        assert_eq!(Framing::default(), Framing::sse());
        assert_eq!(Framing::ndjson().record_separator, "\n");
        let custom = Framing::custom(";;").with_part_separator(",");
        assert_eq!(custom.format, Format::Custom);
        assert_eq!(custom.part_separator.as_deref(), Some(","));
        assert!(custom.key_value_separator.is_none());
    }
}
