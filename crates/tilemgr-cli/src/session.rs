//! Echo-synchronized command session.
//!
//! The interpreter echoes every character it receives as it consumes it.
//! The session reuses that echo as the acknowledgement for each command
//! instead of inventing a framed ack on top of the raw byte stream. Replies
//! that are free text rather than an echo (digest output, listings, chip
//! id) are read byte by byte up to the idle-prompt sentinel.

use tracing::{debug, trace};

use tilemgr_protocol::{Command, DirectoryEntry, ListingParser, ProtocolError, PROMPT_BYTE};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Whether a command's echo is verified as its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Read the echo back and fail on any difference.
    Verify,
    /// Fire and forget. Used where no echo can arrive (restart kills the
    /// console mid-echo) or where its outcome does not matter (halt,
    /// remove of a possibly missing file).
    Skip,
}

/// One open exchange with a device.
///
/// The session owns the transport exclusively; terminal mode takes the
/// session over for its lifetime and returns ownership only by ending.
pub struct DeviceSession {
    pub(crate) transport: Box<dyn Transport>,
}

impl DeviceSession {
    /// Wrap an already open transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        DeviceSession { transport }
    }

    /// Classify `endpoint` and open the matching transport.
    pub fn open(endpoint: &str, baud: u32) -> Result<Self> {
        Ok(DeviceSession::new(crate::transport::open(endpoint, baud)?))
    }

    /// Send one command, optionally verifying its echo.
    pub fn send(&mut self, command: &Command, echo: Echo) -> Result<()> {
        let data = command.encode()?;
        trace!(command = %command.to_statement(), ?echo, "send");
        self.transport.write(&data, echo == Echo::Verify)
    }

    /// Read byte by byte until `sentinel` is seen or the stream ends.
    ///
    /// The sentinel itself is not part of the returned reply.
    pub fn read_until_sentinel(&mut self, sentinel: u8) -> Result<Vec<u8>> {
        let mut reply = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.transport.read(&mut byte)?;
            if n == 0 || byte[0] == sentinel {
                break;
            }
            reply.push(byte[0]);
        }
        Ok(reply)
    }

    /// List the device file table, in device-reported order.
    pub fn list(&mut self) -> Result<Vec<DirectoryEntry>> {
        self.send(&Command::FileList, Echo::Verify)?;
        let mut parser = ListingParser::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.transport.read(&mut byte)?;
            if n == 0 {
                debug!("listing reply ended without prompt");
                break;
            }
            if parser.feed(byte[0]) {
                break;
            }
        }
        let entries = parser.into_entries();
        debug!(count = entries.len(), "listing complete");
        Ok(entries)
    }

    /// Remove `name` from the device filesystem.
    ///
    /// Best-effort: removing a name that does not exist is not an error.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        tilemgr_protocol::validate_file_name(name)?;
        debug!(name, "removing remote file");
        self.send(
            &Command::FileRemove {
                name: name.to_string(),
            },
            Echo::Skip,
        )
    }

    /// Restart the node.
    pub fn restart(&mut self) -> Result<()> {
        debug!("restarting node");
        self.send(&Command::Restart, Echo::Skip)
    }

    /// Format the device filesystem.
    pub fn format(&mut self) -> Result<()> {
        debug!("formatting device filesystem");
        self.send(&Command::FileFormat, Echo::Verify)
    }

    /// Query the chip id.
    ///
    /// The command echo carries no digits, so the id is recovered by
    /// keeping only the digits read before the prompt.
    pub fn chip_id(&mut self) -> Result<String> {
        self.send(&Command::ChipId, Echo::Skip)?;
        let reply = self.read_until_sentinel(PROMPT_BYTE)?;
        if reply.is_empty() {
            return Err(Error::Timeout {
                waiting_for: "chip id",
            });
        }
        let id: String = reply
            .into_iter()
            .filter(u8::is_ascii_digit)
            .map(char::from)
            .collect();
        if id.is_empty() {
            return Err(ProtocolError::Parse("chip id reply carried no digits".to_string()).into());
        }
        Ok(id)
    }

    /// Close the transport. Idempotent; invoked on every exit path.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}
