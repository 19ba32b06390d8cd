//! Incremental byte-to-line decoding for the chat stream body.
//!
//! Network chunks arrive at arbitrary boundaries: a chunk can end in the
//! middle of a line or in the middle of a multi-byte UTF-8 character. The
//! decoder buffers raw bytes and only converts to text once a full
//! `\n`-terminated line is available, so split characters reassemble
//! correctly. `\n` (0x0A) never appears inside a multi-byte UTF-8
//! sequence, which makes byte-level line splitting safe.

use std::string::FromUtf8Error;

/// A completed line contained bytes that are not valid UTF-8.
#[derive(Debug, thiserror::Error)]
#[error("stream line is not valid UTF-8: {source}")]
pub struct DecodeError {
    #[from]
    source: FromUtf8Error,
}

/// Stateful line decoder over a stream of byte chunks.
///
/// Holds at most one incomplete trailing line between `push` calls.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return all newly completed lines.
    ///
    /// A trailing `\r` is stripped from each line. The fragment after the
    /// last `\n` (possibly empty, possibly a partial character) stays
    /// buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, DecodeError> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = self.buf[start..end].to_vec();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8(line)?);
            start = end + 1;
        }
        self.buf.drain(..start);

        Ok(lines)
    }

    /// Whether an incomplete line is still buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Consume the decoder at end of stream, returning any unterminated
    /// remainder for logging.
    ///
    /// The remainder is never treated as a final line: only an explicit
    /// terminal event ends a message, so trailing bytes without a newline
    /// are discarded by the caller.
    pub fn finish(self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buf).into_owned())
        }
    }
}
