// MIT License - Copyright (c) 2023 ad2driver contributors

use tracing::warn;

use crate::error::{Ad2Error, Result};

/// A single protocol line with its terminators stripped.
///
/// Produced only by [`LineReader`]; decoding never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine(String);

impl RawLine {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RawLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
impl From<&str> for RawLine {
    fn from(s: &str) -> Self {
        RawLine(s.to_string())
    }
}

/// Splits an unframed byte stream into protocol lines.
///
/// The device terminates every line with `\r\n`; chunks arrive with no
/// framing guarantee, so a partial trailing line is carried over to the
/// next call. The carry-over buffer is bounded: a stream that never
/// produces a terminator fails with [`Ad2Error::FrameTooLong`] instead of
/// growing without limit.
#[derive(Debug)]
pub struct LineReader {
    buf: Vec<u8>,
    max_line_length: usize,
}

impl LineReader {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_length,
        }
    }

    /// Append a chunk and return every complete line it finished.
    ///
    /// Lines split on `\n`; a trailing `\r` is stripped; empty lines are
    /// skipped. No data is lost or duplicated across calls regardless of
    /// how the input is chunked. On overflow the buffer is discarded and
    /// any lines completed by the same chunk are discarded with it; the
    /// connection is about to be reset anyway.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<RawLine>> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        for i in 0..self.buf.len() {
            if self.buf[i] == b'\n' {
                let mut end = i;
                if end > start && self.buf[end - 1] == b'\r' {
                    end -= 1;
                }
                if end > start {
                    let text = String::from_utf8_lossy(&self.buf[start..end]).into_owned();
                    lines.push(RawLine(text));
                }
                start = i + 1;
            }
        }
        self.buf.drain(..start);

        if self.buf.len() > self.max_line_length {
            let actual = self.buf.len();
            self.buf.clear();
            warn!(actual, max = self.max_line_length, "line buffer overflow");
            return Err(Ad2Error::FrameTooLong {
                max: self.max_line_length,
                actual,
            });
        }

        Ok(lines)
    }

    /// Bytes currently buffered while waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
