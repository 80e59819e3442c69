//! Tile Controller Control Protocol
//!
//! This crate provides types and utilities for driving the Lua interpreter
//! exposed by tile controller firmware over its serial console (or a TCP
//! bridge onto the same console). The protocol is plain text:
//!
//! - **Commands** (host → device): one Lua statement per line, terminated
//!   with `\r` (carriage return)
//! - **Echo**: the interpreter echoes every character as it consumes it;
//!   the echo doubles as the acknowledgement for a command
//! - **Replies** (device → host): free text ended by the idle prompt
//!   character `>`
//!
//! File content travels inside `file.write(string.char(...))` statements as
//! decimal byte lists, which keeps the stream printable on links that are
//! not 8-bit clean.
//!
//! # Example
//!
//! ```rust,ignore
//! use tilemgr_protocol::{Command, ListingParser};
//!
//! // Build a command line
//! let cmd = Command::FileOpenWrite { name: "init.lua".to_string() };
//! let line = cmd.encode()?;
//!
//! // Parse a listing reply
//! let mut parser = ListingParser::new();
//! for &byte in reply {
//!     if parser.feed(byte) {
//!         break;
//!     }
//! }
//! ```

mod commands;
mod error;
mod listing;

pub use commands::*;
pub use error::*;
pub use listing::*;
