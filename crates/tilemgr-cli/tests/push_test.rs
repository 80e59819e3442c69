//! Integration tests for the push, listing and remove operations.
//!
//! A mock device stands in for the firmware: it consumes the command
//! stream exactly as written, maintains a file table, echoes like the
//! serial console when asked to, and serves the digest and listing replies
//! the real interpreter would print.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use sha1::{Digest, Sha1};

use tilemgr_cli::{DeviceSession, Error, Result, Transport};

// ============================================================================
// Mock device
// ============================================================================

#[derive(Default)]
struct DeviceState {
    /// File table in creation order.
    files: Vec<(String, Vec<u8>)>,
    /// File currently open for writing.
    open_file: Option<(String, Vec<u8>)>,
    /// Bytes queued for the host to read.
    reply: VecDeque<u8>,
    /// Every statement received, without the terminator.
    commands: Vec<String>,
    /// Flip the first byte of each written chunk.
    corrupt_writes: bool,
    /// Stay silent instead of printing replies.
    mute_replies: bool,
}

impl DeviceState {
    fn execute(&mut self, line: &str) {
        if line.starts_with("file.open(") {
            let names = quoted_strings(line);
            self.open_file = Some((names[0].clone(), Vec::new()));
        } else if line.starts_with("file.write(string.char(") {
            let mut bytes = parse_byte_list(line);
            if self.corrupt_writes && !bytes.is_empty() {
                bytes[0] ^= 0xff;
            }
            if let Some((_, buf)) = self.open_file.as_mut() {
                buf.extend_from_slice(&bytes);
            }
        } else if line == "file.close()" {
            if let Some((name, buf)) = self.open_file.take() {
                match self.files.iter_mut().find(|(n, _)| *n == name) {
                    Some(existing) => existing.1 = buf,
                    None => self.files.push((name, buf)),
                }
            }
        } else if line.starts_with("print(encoder.toHex(crypto.fhash(") {
            let names = quoted_strings(line);
            let target = &names[1];
            let digest = self
                .files
                .iter()
                .find(|(n, _)| n == target)
                .map(|(_, content)| hex::encode(Sha1::digest(content)))
                .unwrap_or_default();
            self.push_reply(&format!("\r\n{}\r\n> ", digest));
        } else if line.starts_with("file.remove(") {
            let names = quoted_strings(line);
            self.files.retain(|(n, _)| *n != names[0]);
        } else if line.starts_with("local l = file.list()") {
            let mut listing = String::new();
            for (name, content) in &self.files {
                listing.push_str(&format!("{} ({} bytes)\r\n", name, content.len()));
            }
            listing.push_str("> ");
            self.push_reply(&listing);
        } else if line == "file.format()" {
            self.files.clear();
        } else if line == "=node.chipid()" {
            self.push_reply("\r\n43501234\r\n> ");
        }
        // halt, flush and restart need no state change
    }

    fn push_reply(&mut self, text: &str) {
        if !self.mute_replies {
            self.reply.extend(text.bytes());
        }
    }
}

/// Transport backed by the mock device. Clones share the device state, so
/// tests can inspect it after the session is done.
#[derive(Clone)]
struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    /// Whether the console echoes what it receives (serial yes, TCP no).
    echo: bool,
}

impl MockDevice {
    fn serial() -> Self {
        MockDevice {
            state: Arc::new(Mutex::new(DeviceState::default())),
            echo: true,
        }
    }

    fn network() -> Self {
        MockDevice {
            state: Arc::new(Mutex::new(DeviceState::default())),
            echo: false,
        }
    }

    fn seed_file(&self, name: &str, content: &[u8]) {
        self.state
            .lock()
            .files
            .push((name.to_string(), content.to_vec()));
    }

    fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, content)| content.clone())
    }

    fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    fn write_chunk_sizes(&self) -> Vec<usize> {
        self.commands()
            .iter()
            .filter(|line| line.starts_with("file.write(string.char("))
            .map(|line| parse_byte_list(line).len())
            .collect()
    }

    fn set_corrupt_writes(&self, corrupt: bool) {
        self.state.lock().corrupt_writes = corrupt;
    }

    fn set_mute_replies(&self, mute: bool) {
        self.state.lock().mute_replies = mute;
    }

    fn session(&self) -> DeviceSession {
        DeviceSession::new(Box::new(self.clone()))
    }
}

impl Transport for MockDevice {
    fn write(&mut self, data: &[u8], verify_echo: bool) -> Result<()> {
        let line = String::from_utf8_lossy(data)
            .trim_end_matches('\r')
            .to_string();
        {
            let mut state = self.state.lock();
            // a real console write starts by discarding stale input
            state.reply.clear();
            if self.echo {
                state.reply.extend(data.iter().copied());
            }
            state.commands.push(line.clone());
            state.execute(&line);
        }
        if self.echo && verify_echo {
            self.echo_check(data)?;
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(data).to_string();
        self.state.lock().commands.push(line);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let mut n = 0;
        while n < buf.len() {
            match state.reply.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.state.lock().reply.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

/// Contents of every double-quoted string in a statement.
fn quoted_strings(line: &str) -> Vec<String> {
    line.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, part)| part.to_string())
        .collect()
}

/// Decimal byte list inside a `string.char(...)` call.
fn parse_byte_list(line: &str) -> Vec<u8> {
    let start = line.find("string.char(").map(|i| i + "string.char(".len());
    let end = line.rfind("))");
    match (start, end) {
        (Some(start), Some(end)) if start <= end => line[start..end]
            .split(',')
            .filter_map(|d| d.trim().parse().ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn no_progress() -> impl FnMut(usize, usize) {
    |_, _| {}
}

// ============================================================================
// Push tests
// ============================================================================

#[test]
fn test_push_digest_round_trip_serial() {
    let device = MockDevice::serial();
    let mut session = device.session();

    let content: Vec<u8> = (0..100u16).map(|i| (i % 256) as u8).collect();
    session
        .push("anim.bin", &content, &mut no_progress())
        .expect("push should verify");

    assert_eq!(device.file("anim.bin").unwrap(), content);
}

#[test]
fn test_push_digest_round_trip_network() {
    let device = MockDevice::network();
    let mut session = device.session();

    let content = b"print(\"hello tile\")\n".to_vec();
    session
        .push("main.lua", &content, &mut no_progress())
        .expect("push should verify");

    assert_eq!(device.file("main.lua").unwrap(), content);
}

#[test]
fn test_push_chunking_uneven() {
    let device = MockDevice::serial();
    let mut session = device.session();

    let content = vec![7u8; 100];
    session
        .push_chunked("a.bin", &content, 32, &mut no_progress())
        .unwrap();

    // ceil(100/32) writes, all full except a 4-byte tail
    assert_eq!(device.write_chunk_sizes(), vec![32, 32, 32, 4]);
}

#[test]
fn test_push_chunking_exact_multiple() {
    let device = MockDevice::serial();
    let mut session = device.session();

    let content = vec![7u8; 64];
    session
        .push_chunked("a.bin", &content, 32, &mut no_progress())
        .unwrap();

    assert_eq!(device.write_chunk_sizes(), vec![32, 32]);
}

#[test]
fn test_push_command_sequence() {
    let device = MockDevice::serial();
    let mut session = device.session();

    session.push("a.bin", &[1, 2, 3], &mut no_progress()).unwrap();

    let commands = device.commands();
    assert_eq!(commands[0], "if run then run(-1) end");
    assert_eq!(commands[1], "file.open(\"a.bin\", \"w\")");
    assert_eq!(commands[2], "file.write(string.char(1,2,3))");
    assert_eq!(commands[3], "file.flush()");
    assert_eq!(commands[4], "file.close()");
    assert_eq!(
        commands[5],
        "print(encoder.toHex(crypto.fhash(\"sha1\",\"a.bin\")))"
    );
    assert_eq!(commands.len(), 6);
}

#[test]
fn test_push_progress_reports() {
    let device = MockDevice::serial();
    let mut session = device.session();

    let mut reports = Vec::new();
    let content = vec![0u8; 70];
    session
        .push_chunked("a.bin", &content, 32, &mut |sent, total| {
            reports.push((sent, total))
        })
        .unwrap();

    assert_eq!(reports, vec![(32, 70), (64, 70), (70, 70)]);
}

#[test]
fn test_push_integrity_mismatch() {
    let device = MockDevice::serial();
    device.set_corrupt_writes(true);
    let mut session = device.session();

    let err = session
        .push("a.bin", &[1, 2, 3, 4], &mut no_progress())
        .unwrap_err();
    match err {
        Error::Integrity { expected, actual } => {
            assert_ne!(expected, actual);
            assert_eq!(expected.len(), 40);
        }
        other => panic!("unexpected error: {other}"),
    }

    // no rollback: the corrupted file stays as the device produced it
    assert!(device.file("a.bin").is_some());
}

#[test]
fn test_push_silent_device_times_out() {
    let device = MockDevice::serial();
    device.set_mute_replies(true);
    let mut session = device.session();

    let err = session
        .push("a.bin", &[1, 2, 3], &mut no_progress())
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
}

#[test]
fn test_push_rejects_bad_name_before_sending() {
    let device = MockDevice::serial();
    let mut session = device.session();

    let err = session
        .push("bad\"name", &[1], &mut no_progress())
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(device.commands().is_empty());
}

#[test]
fn test_push_empty_file() {
    let device = MockDevice::serial();
    let mut session = device.session();

    session.push("empty", &[], &mut no_progress()).unwrap();
    assert_eq!(device.file("empty").unwrap(), Vec::<u8>::new());
    assert!(device.write_chunk_sizes().is_empty());
}

// ============================================================================
// Listing and remove tests
// ============================================================================

#[test]
fn test_list_reports_device_order() {
    let device = MockDevice::serial();
    device.seed_file("c.lua", b"ccc");
    device.seed_file("a.lua", b"a");
    device.seed_file("b.bin", &[0, 1, 2, 3]);
    let mut session = device.session();

    let entries = session.list().unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["c.lua", "a.lua", "b.bin"]);
    assert_eq!(entries[0].size, Some(3));
    assert_eq!(entries[2].size, Some(4));
}

#[test]
fn test_remove_then_list_excludes_name() {
    let device = MockDevice::serial();
    device.seed_file("a.lua", b"a");
    device.seed_file("b.lua", b"b");
    let mut session = device.session();

    session.remove("a.lua").unwrap();
    let names: Vec<String> = session
        .list()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert!(!names.contains(&"a.lua".to_string()));
    assert!(names.contains(&"b.lua".to_string()));
}

#[test]
fn test_remove_missing_name_is_idempotent() {
    let device = MockDevice::serial();
    device.seed_file("b.lua", b"b");
    let mut session = device.session();

    session.remove("never-existed").unwrap();
    session.remove("never-existed").unwrap();
    let names: Vec<String> = session
        .list()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["b.lua".to_string()]);
}

#[test]
fn test_list_empty_device() {
    let device = MockDevice::serial();
    let mut session = device.session();
    assert!(session.list().unwrap().is_empty());
}

// ============================================================================
// Other operations
// ============================================================================

#[test]
fn test_chip_id() {
    let device = MockDevice::serial();
    let mut session = device.session();
    assert_eq!(session.chip_id().unwrap(), "43501234");
}

#[test]
fn test_wifi_config_pushes_config_file() {
    let device = MockDevice::serial();
    let mut session = device.session();

    session
        .configure_wifi("tiles", "hunter2", &mut no_progress())
        .unwrap();

    let content = device.file("_config.lua").unwrap();
    assert_eq!(
        content,
        b"WIFI_SSID=\"tiles\"\nWIFI_PASSWORD=\"hunter2\"\n".to_vec()
    );
}

#[test]
fn test_hostname_config() {
    let device = MockDevice::serial();
    let mut session = device.session();

    session
        .configure_hostname("tile-7", &mut no_progress())
        .unwrap();
    assert_eq!(device.file("hostname").unwrap(), b"tile-7".to_vec());
}

#[test]
fn test_format_clears_file_table() {
    let device = MockDevice::serial();
    device.seed_file("a.lua", b"a");
    let mut session = device.session();

    session.format().unwrap();
    assert!(session.list().unwrap().is_empty());
}
