//! The inbound byte pipeline: UTF-8 with lenient decoding, line splitting on
//! LF with a single trailing CR stripped, and the sanitizer that drops the
//! characters the string type cannot carry.

use bytes::BytesMut;

use loam_values::util::sanitize_line;

/// Accumulates raw bytes and yields decoded lines. Binary-mode connections
/// bypass this and take the buffer wholesale.
#[derive(Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The next complete line, if one is buffered: split at LF, strip one
    /// trailing CR, decode leniently, sanitize.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line = self.buf.split_to(pos + 1);
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        let decoded = String::from_utf8_lossy(&line);
        Some(sanitize_line(&decoded))
    }

    /// Everything buffered, for binary-mode delivery.
    pub fn take_all(&mut self) -> Vec<u8> {
        self.buf.split().to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The out-of-band prefix and the escape that re-inserts an in-band line
/// which would otherwise look out-of-band.
pub const OOB_PREFIX: &str = "#$#";
pub const OOB_QUOTE_PREFIX: &str = "#$\"";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lf_and_crlf() {
        let mut lb = LineBuffer::new();
        lb.extend(b"hello\r\nworld\npartial");
        assert_eq!(lb.next_line().unwrap(), "hello");
        assert_eq!(lb.next_line().unwrap(), "world");
        assert!(lb.next_line().is_none());
        assert!(!lb.is_empty());
        lb.extend(b"\n");
        assert_eq!(lb.next_line().unwrap(), "partial");
        assert!(lb.is_empty());
    }

    #[test]
    fn test_lenient_utf8_and_sanitize() {
        let mut lb = LineBuffer::new();
        lb.extend(b"ok\xffbad\x07bell\n");
        let line = lb.next_line().unwrap();
        assert!(line.starts_with("ok"));
        assert!(!line.contains('\x07'));
        assert!(line.contains('\u{FFFD}'));
    }

    #[test]
    fn test_tab_survives() {
        let mut lb = LineBuffer::new();
        lb.extend(b"a\tb\n");
        assert_eq!(lb.next_line().unwrap(), "a\tb");
    }
}
