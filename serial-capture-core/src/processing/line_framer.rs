use chrono::{DateTime, SecondsFormat, Utc};

/// Longest run of bytes without a newline that is held back before it is
/// emitted as a line of its own.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Splits a serial byte stream into trimmed, non-empty text lines.
///
/// Bytes may arrive in arbitrary chunks; an unterminated tail is buffered
/// until its newline arrives, the buffer overflows, or [`finish`](Self::finish)
/// is called.
#[derive(Debug)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_line_len: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_len: max_line_len.max(1),
        }
    }

    /// Feed a chunk of bytes, returning every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if let Some(line) = self.take_pending() {
                    lines.push(line);
                }
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() >= self.max_line_len {
                if let Some(line) = self.take_pending() {
                    lines.push(line);
                }
            }
        }
        lines
    }

    /// Flush the unterminated tail, if it holds any text.
    pub fn finish(&mut self) -> Option<String> {
        self.take_pending()
    }

    /// Bytes buffered while waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn take_pending(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&raw);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// A received line stamped with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl CapturedLine {
    pub fn now(text: String) -> Self {
        Self {
            timestamp: Utc::now(),
            text,
        }
    }

    /// ISO-8601 UTC with microseconds, e.g. `2025-01-01T12:00:00.123456Z`.
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// `[<ts>] <line>` for the text sink.
    pub fn text_line(&self) -> String {
        format!("[{}] {}", self.iso_timestamp(), self.text)
    }

    /// `<ts>,<line>` for the vars sink. The line is written verbatim.
    pub fn vars_row(&self) -> String {
        format!("{},{}", self.iso_timestamp(), self.text)
    }
}
