//! Commands sent to the tile controller's Lua interpreter.
//!
//! Every command renders as one statement in the interpreter language and is
//! terminated with a carriage return before transmission. Names are embedded
//! in double-quoted Lua strings, so they must not contain anything that
//! would terminate the string or the line early.

use crate::error::{ProtocolError, ProtocolResult};

/// Prompt character printed by the interpreter when it is idle. Doubles as
/// the sentinel terminating free-text replies.
pub const PROMPT_BYTE: u8 = b'>';

/// Maximum encoded command length the interpreter's line buffer accepts.
pub const MAX_LINE_LENGTH: usize = 256;

/// Default number of content bytes carried per write command. Expanded to
/// decimal form this stays well under [`MAX_LINE_LENGTH`].
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Commands understood by the tile controller firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Stop any running program. The firmware only defines `run` while a
    /// program is active, so this is a no-op on an idle device.
    HaltProgram,

    /// Open `name` on the device filesystem for writing.
    FileOpenWrite {
        /// Destination file name.
        name: String,
    },

    /// Append one chunk of bytes to the file currently open for writing.
    FileWriteChunk {
        /// Raw content bytes for this chunk.
        bytes: Vec<u8>,
    },

    /// Flush the file currently open for writing.
    FileFlush,

    /// Close the file currently open for writing.
    FileClose,

    /// Print the hex SHA-1 digest of `name`.
    FileDigest {
        /// File to digest.
        name: String,
    },

    /// Remove `name` from the device filesystem.
    FileRemove {
        /// File to remove.
        name: String,
    },

    /// Print one `name (size bytes)` line per file in the file table.
    FileList,

    /// Format the device filesystem.
    FileFormat,

    /// Restart the node.
    Restart,

    /// Print the chip id.
    ChipId,

    /// A raw statement, passed through untouched.
    Raw {
        /// The statement text.
        line: String,
    },
}

impl Command {
    /// Render the command as a statement without the terminator.
    pub fn to_statement(&self) -> String {
        match self {
            Command::HaltProgram => "if run then run(-1) end".to_string(),
            Command::FileOpenWrite { name } => format!("file.open(\"{}\", \"w\")", name),
            Command::FileWriteChunk { bytes } => {
                format!("file.write(string.char({}))", byte_list(bytes))
            }
            Command::FileFlush => "file.flush()".to_string(),
            Command::FileClose => "file.close()".to_string(),
            Command::FileDigest { name } => {
                format!("print(encoder.toHex(crypto.fhash(\"sha1\",\"{}\")))", name)
            }
            Command::FileRemove { name } => format!("file.remove(\"{}\")", name),
            Command::FileList => {
                "local l = file.list();for k,v in pairs(l) do print(k..' ('..v..' bytes)'); end"
                    .to_string()
            }
            Command::FileFormat => "file.format()".to_string(),
            Command::Restart => "node.restart()".to_string(),
            Command::ChipId => "=node.chipid()".to_string(),
            Command::Raw { line } => line.clone(),
        }
    }

    /// Encode the command for transmission, appending the `\r` terminator.
    ///
    /// Validates any embedded file name and the encoded line length.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        if let Some(name) = self.file_name() {
            validate_file_name(name)?;
        }

        let statement = self.to_statement();
        let encoded_len = statement.len() + 1;
        if encoded_len > MAX_LINE_LENGTH {
            return Err(ProtocolError::LineTooLong {
                max: MAX_LINE_LENGTH,
                actual: encoded_len,
            });
        }

        let mut buf = Vec::with_capacity(encoded_len);
        buf.extend_from_slice(statement.as_bytes());
        buf.push(b'\r');
        Ok(buf)
    }

    /// The file name embedded in this command, if any.
    fn file_name(&self) -> Option<&str> {
        match self {
            Command::FileOpenWrite { name }
            | Command::FileDigest { name }
            | Command::FileRemove { name } => Some(name),
            _ => None,
        }
    }
}

/// Check that `name` can be embedded in a double-quoted Lua string without
/// breaking the statement around it.
pub fn validate_file_name(name: &str) -> ProtocolResult<()> {
    if name.is_empty() {
        return Err(ProtocolError::InvalidFileName {
            name: name.to_string(),
            reason: "empty name",
        });
    }
    for ch in name.chars() {
        let reason = match ch {
            '"' => Some("double quote would terminate the quoted name"),
            '\\' => Some("backslash starts a Lua escape sequence"),
            '\r' | '\n' => Some("line break would terminate the command"),
            c if c.is_control() => Some("control character"),
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(ProtocolError::InvalidFileName {
                name: name.to_string(),
                reason,
            });
        }
    }
    Ok(())
}

/// Render bytes as the decimal list inside a `string.char(...)` call.
fn byte_list(bytes: &[u8]) -> String {
    let decimals: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
    decimals.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_halt() {
        let cmd = Command::HaltProgram;
        assert_eq!(cmd.encode().unwrap(), b"if run then run(-1) end\r");
    }

    #[test]
    fn test_encode_file_open() {
        let cmd = Command::FileOpenWrite {
            name: "init.lua".to_string(),
        };
        assert_eq!(cmd.encode().unwrap(), b"file.open(\"init.lua\", \"w\")\r");
    }

    #[test]
    fn test_encode_write_chunk() {
        let cmd = Command::FileWriteChunk {
            bytes: vec![72, 105, 0, 255],
        };
        assert_eq!(cmd.encode().unwrap(), b"file.write(string.char(72,105,0,255))\r");
    }

    #[test]
    fn test_encode_digest() {
        let cmd = Command::FileDigest {
            name: "main.lua".to_string(),
        };
        assert_eq!(
            cmd.encode().unwrap(),
            b"print(encoder.toHex(crypto.fhash(\"sha1\",\"main.lua\")))\r"
        );
    }

    #[test]
    fn test_encode_remove() {
        let cmd = Command::FileRemove {
            name: "old.lua".to_string(),
        };
        assert_eq!(cmd.encode().unwrap(), b"file.remove(\"old.lua\")\r");
    }

    #[test]
    fn test_encode_restart() {
        assert_eq!(Command::Restart.encode().unwrap(), b"node.restart()\r");
    }

    #[test]
    fn test_encode_chip_id() {
        assert_eq!(Command::ChipId.encode().unwrap(), b"=node.chipid()\r");
    }

    #[test]
    fn test_reject_quoted_name() {
        let cmd = Command::FileOpenWrite {
            name: "a\"b".to_string(),
        };
        assert!(matches!(
            cmd.encode(),
            Err(ProtocolError::InvalidFileName { .. })
        ));
    }

    #[test]
    fn test_reject_empty_name() {
        assert!(validate_file_name("").is_err());
    }

    #[test]
    fn test_reject_backslash_and_line_breaks() {
        assert!(validate_file_name("a\\b").is_err());
        assert!(validate_file_name("a\rb").is_err());
        assert!(validate_file_name("a\nb").is_err());
        assert!(validate_file_name("tiles/anim.bin").is_ok());
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        // 96 bytes of 255 expand to 4 characters each and overflow the line
        let cmd = Command::FileWriteChunk {
            bytes: vec![255; 96],
        };
        assert!(matches!(
            cmd.encode(),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_default_chunk_fits_line() {
        let cmd = Command::FileWriteChunk {
            bytes: vec![255; DEFAULT_CHUNK_SIZE],
        };
        let encoded = cmd.encode().unwrap();
        assert!(encoded.len() <= MAX_LINE_LENGTH);
    }
}
