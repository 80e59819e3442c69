//! Interactive terminal session.
//!
//! Two cooperating tasks share the device connection: a background reader
//! pumping received bytes into a bounded channel for display, and the
//! foreground alternating between raw passthrough (keystrokes forwarded
//! unbuffered) and a line-oriented local shell. The escape byte parks the
//! reader; it is only shut down and joined when the session ends, never
//! leaked. Terminal settings are restored on every exit path, including
//! Ctrl-C.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::Result;
use crate::push::ProgressBar;
use crate::session::DeviceSession;
use crate::transport::Transport;

/// Escape byte switching from passthrough to the local shell (ESC).
pub const ESCAPE_BYTE: u8 = 0x1b;

/// Capacity of the device-byte display channel.
const READ_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Raw terminal mode
// ============================================================================

static SAVED_TERMIOS: Mutex<Option<libc::termios>> = Mutex::new(None);

/// Holds the controlling terminal in raw mode; restores the saved settings
/// on drop.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self> {
        let fd = io::stdin().as_raw_fd();
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        {
            let mut saved = SAVED_TERMIOS.lock();
            if saved.is_none() {
                *saved = Some(termios);
            }
        }
        let mut raw = termios;
        unsafe { libc::cfmakeraw(&mut raw) };
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, &raw) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Restore the saved terminal settings, if any. Safe to call repeatedly
/// and from the signal handler thread.
fn restore_terminal() {
    let saved = SAVED_TERMIOS.lock();
    if let Some(ref termios) = *saved {
        let fd = io::stdin().as_raw_fd();
        unsafe {
            libc::tcsetattr(fd, libc::TCSADRAIN, termios);
        }
    }
}

/// Restore the terminal before dying on Ctrl-C. Raw mode disables ISIG and
/// forwards the byte to the device instead, so this only fires from the
/// local shell or during attach/detach.
fn install_signal_restore() {
    let _ = ctrlc::set_handler(|| {
        restore_terminal();
        std::process::exit(130);
    });
}

// ============================================================================
// Reader coordination
// ============================================================================

/// Desired state of the background reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Running,
    Parked,
    Shutdown,
}

struct ControlInner {
    desired: ReaderState,
    /// Set by the reader once it has stopped issuing reads.
    reader_idle: bool,
}

/// Handshake between the foreground and the background reader.
struct ReaderControl {
    inner: Mutex<ControlInner>,
    cond: Condvar,
}

impl ReaderControl {
    fn new() -> Self {
        ReaderControl {
            inner: Mutex::new(ControlInner {
                desired: ReaderState::Running,
                reader_idle: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Ask the reader to park and wait until it has actually stopped
    /// issuing reads. Only then may the foreground read from the
    /// transport itself.
    fn park_and_wait(&self) {
        let mut inner = self.inner.lock();
        if inner.desired == ReaderState::Shutdown {
            return;
        }
        inner.desired = ReaderState::Parked;
        self.cond.notify_all();
        while !inner.reader_idle {
            self.cond.wait(&mut inner);
        }
    }

    /// Let a parked reader continue.
    fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.desired == ReaderState::Parked {
            inner.desired = ReaderState::Running;
        }
        self.cond.notify_all();
    }

    /// Ask the reader to exit.
    fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.desired = ReaderState::Shutdown;
        self.cond.notify_all();
    }

    /// Reader side: the currently desired state.
    fn desired(&self) -> ReaderState {
        self.inner.lock().desired
    }

    /// Reader side: block while parked. Returns the state to continue with.
    fn park(&self) -> ReaderState {
        let mut inner = self.inner.lock();
        inner.reader_idle = true;
        self.cond.notify_all();
        while inner.desired == ReaderState::Parked {
            self.cond.wait(&mut inner);
        }
        inner.reader_idle = false;
        inner.desired
    }
}

/// Background task pumping device bytes into the display channel.
fn reader_loop(
    mut transport: Box<dyn Transport>,
    control: Arc<ReaderControl>,
    tx: Sender<Vec<u8>>,
) {
    let mut buf = [0u8; 512];
    loop {
        match control.desired() {
            ReaderState::Shutdown => break,
            ReaderState::Parked => {
                if control.park() == ReaderState::Shutdown {
                    break;
                }
                continue;
            }
            ReaderState::Running => {}
        }
        match transport.read(&mut buf) {
            // Timeout; re-check the desired state.
            Ok(0) => continue,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(%err, "device read failed, terminal reader exiting");
                break;
            }
        }
    }
    debug!("terminal reader exited");
}

/// Pump local keystrokes into a channel so the foreground can wait on the
/// device and the keyboard at once. Exits on stdin EOF or when the
/// receiver is dropped.
fn spawn_stdin_pump() -> Result<Receiver<Vec<u8>>> {
    let (tx, rx) = bounded::<Vec<u8>>(16);
    thread::Builder::new()
        .name("stdin-pump".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            debug!("stdin pump exited");
        })?;
    Ok(rx)
}

// ============================================================================
// Local shell
// ============================================================================

/// Commands accepted by the local shell.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Copy { source: String, dest: Option<String> },
    Remove { name: String },
    Restart,
    Quit,
    Empty,
    Unknown(String),
}

impl ShellCommand {
    fn parse(line: &str) -> ShellCommand {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return ShellCommand::Empty;
        };
        match verb {
            "copy" => match words.next() {
                Some(source) => ShellCommand::Copy {
                    source: source.to_string(),
                    dest: words.next().map(str::to_string),
                },
                None => ShellCommand::Unknown(line.to_string()),
            },
            "remove" | "rm" => match words.next() {
                Some(name) => ShellCommand::Remove {
                    name: name.to_string(),
                },
                None => ShellCommand::Unknown(line.to_string()),
            },
            "restart" => ShellCommand::Restart,
            "quit" | "exit" => ShellCommand::Quit,
            _ => ShellCommand::Unknown(line.to_string()),
        }
    }
}

// ============================================================================
// Terminal session
// ============================================================================

/// What ended a passthrough stretch.
enum Passthrough {
    /// The escape byte was pressed.
    Escape,
    /// Stdin closed or the device connection dropped.
    Eof,
}

/// What one shell exchange decided.
enum ShellOutcome {
    Resume,
    Quit,
}

/// Interactive session owning the device connection for its lifetime.
pub struct TerminalSession {
    session: DeviceSession,
    control: Arc<ReaderControl>,
    device_rx: Receiver<Vec<u8>>,
    stdin_rx: Receiver<Vec<u8>>,
    reader: Option<thread::JoinHandle<()>>,
}

impl TerminalSession {
    /// Attach to the device, spawning the background reader.
    ///
    /// On failure the transport is closed before returning.
    pub fn new(mut session: DeviceSession) -> Result<Self> {
        match Self::attach(&mut session) {
            Ok((control, device_rx, stdin_rx, reader)) => Ok(TerminalSession {
                session,
                control,
                device_rx,
                stdin_rx,
                reader: Some(reader),
            }),
            Err(err) => {
                let _ = session.close();
                Err(err)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn attach(
        session: &mut DeviceSession,
    ) -> Result<(
        Arc<ReaderControl>,
        Receiver<Vec<u8>>,
        Receiver<Vec<u8>>,
        thread::JoinHandle<()>,
    )> {
        let reader_transport = session.transport.try_clone()?;
        let control = Arc::new(ReaderControl::new());
        let (tx, device_rx) = bounded(READ_CHANNEL_CAPACITY);
        let reader = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("device-reader".to_string())
                .spawn(move || reader_loop(reader_transport, control, tx))?
        };
        let stdin_rx = spawn_stdin_pump()?;
        Ok((control, device_rx, stdin_rx, reader))
    }

    /// Run until `quit`, stdin EOF or the device connection drops.
    ///
    /// The reader is joined and the transport closed on every exit path.
    pub fn run(mut self) -> Result<()> {
        install_signal_restore();
        eprintln!("--- terminal attached, press ESC for the local shell ---");
        let result = self.event_loop();
        self.shutdown();
        let close = self.session.close();
        eprintln!("--- terminal detached ---");
        result.and(close)
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            match self.passthrough()? {
                Passthrough::Eof => return Ok(()),
                Passthrough::Escape => {}
            }
            // Stop the reader before the shell touches the transport, so a
            // pending passthrough read cannot swallow a command echo.
            self.control.park_and_wait();
            self.drain_pending_output()?;
            match self.local_shell()? {
                ShellOutcome::Quit => return Ok(()),
                ShellOutcome::Resume => self.control.resume(),
            }
        }
    }

    /// Raw passthrough until the escape byte or end of input.
    fn passthrough(&mut self) -> Result<Passthrough> {
        let device_rx = self.device_rx.clone();
        let stdin_rx = self.stdin_rx.clone();
        let _raw = RawModeGuard::enter()?;
        let mut stdout = io::stdout().lock();
        loop {
            crossbeam_channel::select! {
                recv(device_rx) -> msg => match msg {
                    Ok(bytes) => {
                        stdout.write_all(&bytes)?;
                        stdout.flush()?;
                    }
                    Err(_) => return Ok(Passthrough::Eof),
                },
                recv(stdin_rx) -> msg => match msg {
                    Ok(bytes) => {
                        let (before, escaped) = split_at_escape(&bytes, ESCAPE_BYTE);
                        if !before.is_empty() {
                            self.session.transport.write_raw(before)?;
                        }
                        if escaped {
                            return Ok(Passthrough::Escape);
                        }
                    }
                    Err(_) => return Ok(Passthrough::Eof),
                },
            }
        }
    }

    /// Flush device bytes received but not yet displayed. Nothing is lost
    /// across the mode switch.
    fn drain_pending_output(&mut self) -> Result<()> {
        let mut stdout = io::stdout().lock();
        let mut drained = false;
        while let Ok(bytes) = self.device_rx.try_recv() {
            stdout.write_all(&bytes)?;
            drained = true;
        }
        if drained {
            stdout.write_all(b"\r\n")?;
        }
        stdout.flush()?;
        Ok(())
    }

    /// One local shell exchange. Anything but `quit` returns to
    /// passthrough; each command reports its own success or failure.
    fn local_shell(&mut self) -> Result<ShellOutcome> {
        eprint!("[?] ");
        let Some(line) = self.read_line() else {
            return Ok(ShellOutcome::Quit);
        };
        match ShellCommand::parse(&line) {
            ShellCommand::Quit => Ok(ShellOutcome::Quit),
            ShellCommand::Empty => Ok(ShellOutcome::Resume),
            ShellCommand::Copy { source, dest } => {
                let mut bar = ProgressBar::new("copy");
                let outcome = self.session.push_file(
                    Path::new(&source),
                    dest.as_deref(),
                    &mut |sent, total| bar.update(sent, total),
                );
                match outcome {
                    Ok(()) => eprintln!("copied {}", source),
                    Err(err) => eprintln!("copy failed: {}", err),
                }
                Ok(ShellOutcome::Resume)
            }
            ShellCommand::Remove { name } => {
                match self.session.remove(&name) {
                    Ok(()) => eprintln!("removed {}", name),
                    Err(err) => eprintln!("remove failed: {}", err),
                }
                Ok(ShellOutcome::Resume)
            }
            ShellCommand::Restart => {
                match self.session.restart() {
                    Ok(()) => eprintln!("restart sent"),
                    Err(err) => eprintln!("restart failed: {}", err),
                }
                Ok(ShellOutcome::Resume)
            }
            ShellCommand::Unknown(input) => {
                eprintln!("unknown command {:?} (copy <src> [dst] | remove <name> | restart | quit)", input);
                Ok(ShellOutcome::Resume)
            }
        }
    }

    /// One line of local input, cooked mode.
    fn read_line(&self) -> Option<String> {
        let mut line = Vec::new();
        loop {
            match self.stdin_rx.recv() {
                Ok(bytes) => {
                    for byte in bytes {
                        if byte == b'\n' {
                            return Some(String::from_utf8_lossy(&line).trim().to_string());
                        }
                        line.push(byte);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Stop and join the reader.
    fn shutdown(&mut self) {
        self.control.shutdown();
        if let Some(handle) = self.reader.take() {
            // Keep the display channel drained so a blocked send cannot
            // keep the reader from seeing the shutdown request.
            while !handle.is_finished() {
                let _ = self.device_rx.recv_timeout(Duration::from_millis(50));
            }
            let _ = handle.join();
        }
    }
}

/// Split passthrough input at the escape byte. Returns the bytes before it
/// and whether it was present; anything after the escape is dropped.
fn split_at_escape(bytes: &[u8], escape: u8) -> (&[u8], bool) {
    match bytes.iter().position(|&b| b == escape) {
        Some(pos) => (&bytes[..pos], true),
        None => (bytes, false),
    }
}

// ============================================================================
// Tests
// ============================================================================
