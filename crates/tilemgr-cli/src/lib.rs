//! Host-side manager for tile controller devices.
//!
//! Talks to the Lua interpreter exposed on a board's serial console, or to
//! the same console bridged over TCP. Commands are acknowledged by their
//! echo; file uploads travel in bounded chunks and are verified with a
//! SHA-1 digest computed on both ends.
//!
//! The wire protocol itself (command construction, listing parser) lives in
//! the `tilemgr-protocol` crate; this crate adds the transports, the
//! echo-synchronized session, the push sequence, the interactive terminal
//! and the command-line front end.

pub mod cli;
pub mod error;
pub mod push;
pub mod session;
pub mod terminal;
pub mod transport;

pub use error::{Error, Result};
pub use session::{DeviceSession, Echo};
pub use transport::{Endpoint, Transport};
