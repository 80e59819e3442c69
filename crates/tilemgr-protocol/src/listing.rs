//! Remote directory listing parser.
//!
//! The listing command makes the firmware print one `name (size bytes)`
//! line per file table entry and then return to its idle prompt. The parser
//! consumes the reply byte by byte: non-line-break bytes accumulate into a
//! line buffer, CR or LF flushes a non-empty buffer as one entry, and the
//! prompt sentinel ends the listing. Blank lines are tolerated.

use bytes::BytesMut;
use log::trace;

use crate::commands::PROMPT_BYTE;

/// One file table entry reported by the device.
///
/// Entries arrive in device-reported order, which is not guaranteed stable
/// across reboots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Bare file name, without the size suffix.
    pub name: String,
    /// Size in bytes, when the firmware reported one.
    pub size: Option<u64>,
}

impl std::fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.size {
            Some(size) => write!(f, "{} ({} bytes)", self.name, size),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Incremental parser for listing replies.
#[derive(Debug, Default)]
pub struct ListingParser {
    /// Buffer for the line currently being received.
    line: BytesMut,
    /// Completed entries in device order.
    entries: Vec<DirectoryEntry>,
    /// Whether the sentinel has been seen.
    done: bool,
}

impl ListingParser {
    /// Create a new listing parser.
    pub fn new() -> Self {
        ListingParser::default()
    }

    /// Feed one received byte.
    ///
    /// Returns `true` once the prompt sentinel has been observed and the
    /// listing is complete. Further bytes are ignored after that.
    pub fn feed(&mut self, byte: u8) -> bool {
        if self.done {
            return true;
        }
        match byte {
            PROMPT_BYTE => {
                self.done = true;
            }
            b'\r' | b'\n' => self.flush_line(),
            _ => self.line.extend_from_slice(&[byte]),
        }
        self.done
    }

    /// Feed a buffer of received bytes, stopping at the sentinel.
    ///
    /// Returns `true` once the listing is complete.
    pub fn feed_all(&mut self, data: &[u8]) -> bool {
        for &byte in data {
            if self.feed(byte) {
                return true;
            }
        }
        self.done
    }

    /// Whether the sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume the parser, yielding entries in device-reported order.
    pub fn into_entries(self) -> Vec<DirectoryEntry> {
        self.entries
    }

    fn flush_line(&mut self) {
        if self.line.is_empty() {
            return;
        }
        let raw = String::from_utf8_lossy(&self.line).trim().to_string();
        self.line.clear();
        if raw.is_empty() {
            return;
        }
        trace!("listing line: {:?}", raw);
        self.entries.push(parse_entry(&raw));
    }
}

/// Split a raw listing line into name and size.
///
/// The name is everything before the first space that precedes a
/// `(size bytes)` suffix; an unrecognized suffix stays part of the name.
fn parse_entry(raw: &str) -> DirectoryEntry {
    if let Some(idx) = raw.find(" (") {
        let (name, suffix) = raw.split_at(idx);
        if let Some(size) = parse_size_suffix(suffix.trim_start()) {
            return DirectoryEntry {
                name: name.to_string(),
                size: Some(size),
            };
        }
    }
    DirectoryEntry {
        name: raw.to_string(),
        size: None,
    }
}

/// Parse a `(N bytes)` suffix.
fn parse_size_suffix(suffix: &str) -> Option<u64> {
    suffix
        .strip_prefix('(')?
        .strip_suffix(')')?
        .strip_suffix(" bytes")?
        .parse()
        .ok()
}
