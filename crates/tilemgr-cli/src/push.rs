//! Chunked file push with digest verification.
//!
//! Content travels as decimal `string.char` byte lists, one bounded chunk
//! per write command, each acknowledged by its echo. The upload only counts
//! once the device reports the same SHA-1 over the written file that the
//! host computed locally over the original content. On mismatch the
//! destination is left exactly as the device produced it; the caller
//! decides whether to push again.

use std::path::Path;

use sha1::{Digest, Sha1};
use tracing::{debug, trace};

use tilemgr_protocol::{validate_file_name, Command, ProtocolError, DEFAULT_CHUNK_SIZE, PROMPT_BYTE};

use crate::error::{Error, Result};
use crate::session::{DeviceSession, Echo};

/// Progress observer, invoked with `(bytes_sent, total_bytes)` after each
/// chunk reaches the device.
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize);

/// Textual progress bar for interactive pushes, drawn on stderr.
pub struct ProgressBar {
    prefix: &'static str,
    width: usize,
}

impl ProgressBar {
    /// Create a bar labelled with `prefix`.
    pub fn new(prefix: &'static str) -> Self {
        ProgressBar { prefix, width: 20 }
    }

    /// Redraw after a chunk. Finishes the line once everything is sent.
    pub fn update(&mut self, sent: usize, total: usize) {
        let filled = if total == 0 {
            self.width
        } else {
            (self.width * sent) / total
        };
        let percent = if total == 0 {
            100.0
        } else {
            100.0 * sent as f64 / total as f64
        };
        eprint!(
            "\r{} |{}{}| {:5.1}%",
            self.prefix,
            "█".repeat(filled),
            "-".repeat(self.width - filled),
            percent
        );
        if sent >= total {
            eprintln!();
        }
    }
}

impl DeviceSession {
    /// Push `content` to the device as `name` with the default chunk size.
    pub fn push(&mut self, name: &str, content: &[u8], progress: Progress) -> Result<()> {
        self.push_chunked(name, content, DEFAULT_CHUNK_SIZE, progress)
    }

    /// Push `content` to the device as `name`, `chunk_size` bytes per write
    /// command.
    ///
    /// All-or-error: any failing step aborts immediately; there is no
    /// partial-success value and no resume.
    pub fn push_chunked(
        &mut self,
        name: &str,
        content: &[u8],
        chunk_size: usize,
        progress: Progress,
    ) -> Result<()> {
        debug_assert!(chunk_size > 0);
        let chunk_size = chunk_size.max(1);

        // Fail on a bad name before touching the device.
        validate_file_name(name)?;

        let local_digest = hex::encode(Sha1::digest(content));
        debug!(name, total = content.len(), chunk_size, %local_digest, "starting push");

        // A running program owns the interpreter; stop it first. No
        // program running is the normal case, so the outcome is ignored.
        self.send(&Command::HaltProgram, Echo::Skip)?;

        self.send(
            &Command::FileOpenWrite {
                name: name.to_string(),
            },
            Echo::Verify,
        )?;

        let total = content.len();
        let mut sent = 0usize;
        for chunk in content.chunks(chunk_size) {
            self.send(
                &Command::FileWriteChunk {
                    bytes: chunk.to_vec(),
                },
                Echo::Verify,
            )?;
            sent += chunk.len();
            trace!(sent, total, "chunk written");
            progress(sent, total);
        }

        self.send(&Command::FileFlush, Echo::Verify)?;
        self.send(&Command::FileClose, Echo::Verify)?;

        self.send(
            &Command::FileDigest {
                name: name.to_string(),
            },
            Echo::Verify,
        )?;
        let reported = self.read_digest_reply()?;

        if !reported.eq_ignore_ascii_case(&local_digest) {
            return Err(Error::Integrity {
                expected: local_digest,
                actual: reported,
            });
        }
        debug!(name, total, "push verified");
        Ok(())
    }

    /// First non-empty line of the sentinel-terminated digest reply.
    fn read_digest_reply(&mut self) -> Result<String> {
        let raw = self.read_until_sentinel(PROMPT_BYTE)?;
        if raw.is_empty() {
            return Err(Error::Timeout {
                waiting_for: "digest reply",
            });
        }
        let text = String::from_utf8_lossy(&raw);
        text.lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::Parse("empty digest reply".to_string()).into())
    }

    /// Push a local file, defaulting the destination name to its file name.
    pub fn push_file(
        &mut self,
        source: &Path,
        name: Option<&str>,
        progress: Progress,
    ) -> Result<()> {
        let name = match name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let content = std::fs::read(source)?;
        self.push(&name, &content, progress)
    }

    /// Write the WiFi credentials file the firmware reads at boot.
    pub fn configure_wifi(&mut self, ssid: &str, passphrase: &str, progress: Progress) -> Result<()> {
        let content = format!("WIFI_SSID=\"{}\"\nWIFI_PASSWORD=\"{}\"\n", ssid, passphrase);
        self.push("_config.lua", content.as_bytes(), progress)
    }

    /// Persist the node hostname.
    pub fn configure_hostname(&mut self, name: &str, progress: Progress) -> Result<()> {
        self.push("hostname", name.as_bytes(), progress)
    }
}
