//! Byte-stream transports for reaching a tile controller.
//!
//! Two media hide behind one blocking interface: a local serial port, and a
//! TCP connection to a node exposing its console on the network. The
//! endpoint string decides which: a path naming an existing
//! character-special device opens serial at the requested baud rate,
//! anything else is parsed as `host[:port]`.
//!
//! The serial side talks directly to the interpreter, which echoes every
//! byte; writes there discard stale input first and settle briefly before
//! the echo is read back. The network side talks to a listener that does
//! not echo, so neither applies.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::fs::FileTypeExt;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default TCP port for network-attached devices.
pub const DEFAULT_TCP_PORT: u16 = 9091;

/// Per-read deadline. An empty read means the deadline passed or the
/// stream ended; callers decide whether that matters.
pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause after each serial write. The interpreter is effectively
/// single-threaded and needs a moment before it starts echoing.
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// A blocking byte stream to the device.
///
/// Exactly one owner drives a transport at a time; terminal mode holds a
/// second handle (via [`Transport::try_clone`]) for its background reader.
pub trait Transport: Send {
    /// Write a command line.
    ///
    /// On serial this discards any stale input, writes everything, waits
    /// [`SETTLE_DELAY`] and, with `verify_echo`, reads the bytes back as
    /// the acknowledgement. On TCP the data is written as-is and
    /// `verify_echo` is ignored, the remote listener does not echo.
    fn write(&mut self, data: &[u8], verify_echo: bool) -> Result<()>;

    /// Write bytes with no input discard, no settle delay and no echo
    /// verification. Used for terminal passthrough keystrokes.
    fn write_raw(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, blocking at most [`READ_TIMEOUT`].
    ///
    /// `Ok(0)` means timeout or end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Drop any bytes already buffered for reading.
    fn discard_input(&mut self) -> Result<()>;

    /// Flush pending output and release the handle. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// A second handle onto the same underlying stream, for the terminal
    /// mode background reader.
    fn try_clone(&self) -> Result<Box<dyn Transport>>;

    /// Read back `expected.len()` bytes one at a time, comparing each to
    /// the byte just written. Fails with [`Error::Desync`] on the first
    /// difference or on a short read, carrying the mismatch index and the
    /// bytes accumulated so far.
    fn echo_check(&mut self, expected: &[u8]) -> Result<()> {
        let mut received = Vec::with_capacity(expected.len());
        let mut byte = [0u8; 1];
        for (index, &want) in expected.iter().enumerate() {
            let n = self.read(&mut byte)?;
            if n == 0 || byte[0] != want {
                return Err(Error::Desync {
                    index,
                    expected: expected.to_vec(),
                    received,
                });
            }
            received.push(byte[0]);
        }
        Ok(())
    }
}

// ============================================================================
// Endpoint classification
// ============================================================================

/// How an endpoint string was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A local serial device.
    Serial {
        /// Device node path.
        path: String,
        /// Baud rate.
        baud: u32,
    },
    /// A TCP connection.
    Network {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl Endpoint {
    /// Classify an endpoint string.
    ///
    /// A path resolving to a character-special device node means serial at
    /// `baud`; anything else is parsed as `host` or `host:port` with
    /// [`DEFAULT_TCP_PORT`] as the default.
    pub fn classify(endpoint: &str, baud: u32) -> Result<Endpoint> {
        if is_char_device(endpoint) {
            return Ok(Endpoint::Serial {
                path: endpoint.to_string(),
                baud,
            });
        }
        match endpoint.split_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| Error::Connect {
                    endpoint: endpoint.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("invalid port number {:?}", port),
                    ),
                })?;
                Ok(Endpoint::Network {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(Endpoint::Network {
                host: endpoint.to_string(),
                port: DEFAULT_TCP_PORT,
            }),
        }
    }
}

fn is_char_device(path: &str) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.file_type().is_char_device())
        .unwrap_or(false)
}

/// Open a transport for `endpoint`, serial at `baud` when it names a
/// character device.
pub fn open(endpoint: &str, baud: u32) -> Result<Box<dyn Transport>> {
    match Endpoint::classify(endpoint, baud)? {
        Endpoint::Serial { path, baud } => {
            debug!(%path, baud, "opening serial transport");
            Ok(Box::new(SerialTransport::open(&path, baud)?))
        }
        Endpoint::Network { host, port } => {
            debug!(%host, port, "opening network transport");
            Ok(Box::new(TcpTransport::connect(&host, port)?))
        }
    }
}

// ============================================================================
// Serial transport
// ============================================================================

/// Serial connection to the interpreter console.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    settle: Duration,
}

impl SerialTransport {
    /// Open `path` at `baud` with the default read timeout.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|err| Error::Connect {
                endpoint: path.to_string(),
                source: err.into(),
            })?;
        Ok(SerialTransport {
            port: Some(port),
            settle: SETTLE_DELAY,
        })
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8], verify_echo: bool) -> Result<()> {
        let port = self.port_mut()?;
        if port.bytes_to_read()? > 0 {
            // Stale bytes here are usually leftover echo from a previous
            // desynchronized exchange.
            port.clear(ClearBuffer::Input)?;
        }
        port.write_all(data)?;
        std::thread::sleep(self.settle);
        if verify_echo {
            self.echo_check(data)?;
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.port_mut()?.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port_mut()?.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            trace!("closing serial transport");
            port.flush()?;
        }
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?
            .try_clone()?;
        Ok(Box::new(SerialTransport {
            port: Some(port),
            settle: self.settle,
        }))
    }
}

// ============================================================================
// TCP transport
// ============================================================================

/// TCP connection to a node's console listener.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to `host:port` with the default read timeout.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let endpoint = format!("{}:{}", host, port);
        let stream = TcpStream::connect((host, port)).map_err(|source| Error::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|source| Error::Connect { endpoint, source })?;
        stream.set_nodelay(true).ok();
        Ok(TcpTransport {
            stream: Some(stream),
        })
    }

    fn stream_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: &[u8], _verify_echo: bool) -> Result<()> {
        self.stream_mut()?.write_all(data)?;
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream_mut()?.read(buf) {
            Ok(n) => Ok(n),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            trace!("closing network transport");
            stream.shutdown(Shutdown::Both).ok();
        }
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?
            .try_clone()?;
        Ok(Box::new(TcpTransport {
            stream: Some(stream),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
