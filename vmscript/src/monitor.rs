//! QEMU human monitor (HMP) transport.
//!
//! The monitor is a line-oriented console: every command is answered with
//! free-form text followed by the `(qemu) ` prompt.  Key injection uses
//! `sendkey`, screen capture uses `screendump`.
//!
//! The pure command/response handling lives in [`Hmp`], which is testable
//! without a socket; [`MonitorTransport`] owns the stream and delegates.

use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, trace};

use crate::keybind::KeyCode;
use crate::mode::{ModeError, Transport};
use crate::script::stmt::ImageFormat;

const PROMPT: &[u8] = b"(qemu) ";
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Substrings in a monitor reply that mean the command failed.
const ERROR_MARKERS: &[&str] = &["unknown command", "Invalid parameter", "invalid", "Error", "error:"];

// ── Hmp (pure) ────────────────────────────────────────────────────────────────

/// HMP command formatting and reply framing.
#[derive(Debug, Default)]
pub struct Hmp {
    buf: Vec<u8>,
}

impl Hmp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sendkey(key: &KeyCode) -> String {
        format!("sendkey {key}\n")
    }

    pub fn screendump(path: &Path, format: ImageFormat) -> String {
        match format {
            ImageFormat::Ppm => format!("screendump {}\n", path.display()),
            ImageFormat::Png => format!("screendump {} -f png\n", path.display()),
        }
    }

    /// Feed received bytes.  Returns the reply text once the prompt arrived.
    pub fn feed(&mut self, bytes: &[u8]) -> Option<String> {
        self.buf.extend_from_slice(bytes);
        if !self.buf.ends_with(PROMPT) {
            return None;
        }
        let body_len = self.buf.len() - PROMPT.len();
        let reply = String::from_utf8_lossy(&self.buf[..body_len]).into_owned();
        self.buf.clear();
        Some(clean_reply(&reply))
    }

    /// Map a reply to the command's outcome.
    pub fn check(command: &str, reply: &str) -> Result<(), ModeError> {
        let cmd = command.trim();
        // The monitor echoes the command line; only the rest is the answer.
        let answer: Vec<&str> = reply
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != cmd)
            .collect();
        match answer.iter().find(|l| ERROR_MARKERS.iter().any(|m| l.contains(m))) {
            Some(line) => Err(ModeError::Transport(format!("{cmd}: {line}"))),
            None => Ok(()),
        }
    }
}

/// Drop terminal control sequences the monitor's line editor emits.
fn clean_reply(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(n) = chars.next() {
                        if n.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

// ── MonitorTransport ──────────────────────────────────────────────────────────

/// Byte stream to a monitor socket.
pub trait Stream: Read + Write {}
impl<S: Read + Write> Stream for S {}

/// A connected HMP monitor.
pub struct MonitorTransport {
    stream: Box<dyn Stream>,
    hmp: Hmp,
}

impl MonitorTransport {
    /// Connect to `address`: `unix:/path`, a path containing `/`, or
    /// `host:port`.
    pub fn connect(address: &str) -> Result<Self, ModeError> {
        let stream: Box<dyn Stream> = if let Some(path) = unix_path(address) {
            connect_unix(path)?
        } else {
            let tcp = TcpStream::connect(address)?;
            tcp.set_read_timeout(Some(READ_TIMEOUT))?;
            tcp.set_nodelay(true)?;
            Box::new(tcp)
        };
        debug!(address, "connected to monitor");
        let mut transport = Self::from_stream(stream);
        // Swallow the banner.
        transport.read_reply()?;
        Ok(transport)
    }

    /// Wrap an already-connected stream; the banner must already be consumed.
    pub fn from_stream(stream: Box<dyn Stream>) -> Self {
        MonitorTransport { stream, hmp: Hmp::new() }
    }

    fn read_reply(&mut self) -> Result<String, ModeError> {
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(ModeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "monitor closed the connection",
                )));
            }
            if let Some(reply) = self.hmp.feed(&chunk[..n]) {
                return Ok(reply);
            }
        }
    }

    fn command(&mut self, command: &str) -> Result<(), ModeError> {
        trace!(command = command.trim_end(), "monitor");
        self.stream.write_all(command.as_bytes())?;
        self.stream.flush()?;
        let reply = self.read_reply()?;
        Hmp::check(command, &reply)
    }
}

impl Transport for MonitorTransport {
    fn send_key(&mut self, key: &KeyCode) -> Result<(), ModeError> {
        self.command(&Hmp::sendkey(key))
    }

    fn screendump(&mut self, path: &Path, format: ImageFormat) -> Result<(), ModeError> {
        self.command(&Hmp::screendump(path, format))
    }
}

fn unix_path(address: &str) -> Option<&str> {
    address
        .strip_prefix("unix:")
        .or_else(|| address.contains('/').then_some(address))
}

#[cfg(unix)]
fn connect_unix(path: &str) -> Result<Box<dyn Stream>, ModeError> {
    let sock = UnixStream::connect(path)?;
    sock.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(Box::new(sock))
}

#[cfg(not(unix))]
fn connect_unix(path: &str) -> Result<Box<dyn Stream>, ModeError> {
    Err(ModeError::Transport(format!("unix sockets are not supported here: {path}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
