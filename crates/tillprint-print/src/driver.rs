// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer device drivers.
//
// Two transports cover the receipt printers we meet in shops:
//
//   - the CUPS spooler (`lp -o raw`) for USB/serial printers installed as a
//     local queue, addressed by queue name;
//   - raw TCP (JetDirect, port 9100) for network printers, addressed as
//     `host:port` or bare `host`.
//
// Drivers are called from the blocking thread pool, so they use blocking I/O
// with explicit timeouts.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tillprint_core::error::{Result, TillprintError};
use tillprint_document::Device;

/// Default raw TCP port (HP JetDirect).
pub const RAW_PORT: u16 = 9100;

/// Opens printer devices by name.
pub trait DeviceDriver: Send + Sync + 'static {
    fn open(&self, name: &str) -> Result<Box<dyn Device>>;
}

// ---------------------------------------------------------------------------
// CUPS spooler
// ---------------------------------------------------------------------------

/// How often a running `lp` is polled for exit.
const SPOOLER_POLL: Duration = Duration::from_millis(50);

/// Submits raw jobs to a local CUPS queue.
#[derive(Debug, Clone)]
pub struct SpoolerDriver {
    timeout: Duration,
}

impl SpoolerDriver {
    /// `timeout` bounds each hand-off to `lp`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl DeviceDriver for SpoolerDriver {
    fn open(&self, name: &str) -> Result<Box<dyn Device>> {
        let status = Command::new("lpstat")
            .args(["-p", name])
            .env("LC_ALL", "C")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| TillprintError::Driver(format!("cannot run lpstat: {e}")))?;
        if !status.success() {
            return Err(TillprintError::Driver(format!("printer queue '{name}' not found")));
        }
        debug!(printer = name, "Spooler queue opened");
        Ok(Box::new(SpoolerDevice {
            name: name.to_string(),
            buf: Vec::new(),
            timeout: self.timeout,
        }))
    }
}

/// Collects the job and hands it to `lp` on commit.
struct SpoolerDevice {
    name: String,
    buf: Vec<u8>,
    timeout: Duration,
}

impl Device for SpoolerDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> io::Result<()> {
        let mut lp = Command::new("lp");
        lp.args(["-d", &self.name, "-o", "raw", "-t", "tillprint"]);
        let (status, stderr) = run_with_input(&mut lp, &self.buf, self.timeout)?;
        if !status.success() {
            return Err(io::Error::other(format!("lp exited with {status}: {}", stderr.trim())));
        }
        info!(printer = %self.name, bytes = self.buf.len(), "Job handed to spooler");
        self.buf.clear();
        Ok(())
    }

    fn abort(&mut self) {
        self.buf.clear();
    }
}

/// Run `command`, feed it `input` on stdin and wait at most `timeout` for it
/// to exit. The child is always reaped: killed on a failed write or when the
/// deadline passes. Returns the exit status and captured stderr.
fn run_with_input(command: &mut Command, input: &[u8], timeout: Duration) -> io::Result<(ExitStatus, String)> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    // Dropping stdin at the end of the block signals EOF.
    let fed = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(input),
        None => Ok(()),
    };
    if let Err(e) = fed {
        reap(&mut child);
        return Err(e);
    }

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!(pid = child.id(), timeout = ?timeout, "Spooler did not finish, killing it");
                reap(&mut child);
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("spooler did not finish within {timeout:?}"),
                ));
            }
            Ok(None) => std::thread::sleep(SPOOLER_POLL),
            Err(e) => {
                reap(&mut child);
                return Err(e);
            }
        }
    };

    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        if let Err(e) = pipe.read_to_string(&mut stderr) {
            debug!(error = %e, "Could not read spooler stderr");
        }
    }
    Ok((status, stderr))
}

/// Kill `child` if it is still running and collect its exit status.
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "Kill failed, child already exited");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "Could not reap child process");
    }
}

// ---------------------------------------------------------------------------
// Raw TCP
// ---------------------------------------------------------------------------

/// Streams bytes straight to a network printer.
#[derive(Debug, Clone)]
pub struct RawSocketDriver {
    timeout: Duration,
}

impl RawSocketDriver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl DeviceDriver for RawSocketDriver {
    fn open(&self, name: &str) -> Result<Box<dyn Device>> {
        let target = if has_port(name) {
            name.to_string()
        } else {
            format!("{name}:{RAW_PORT}")
        };
        let addr = target
            .to_socket_addrs()
            .map_err(|e| TillprintError::Driver(format!("cannot resolve {target}: {e}")))?
            .next()
            .ok_or_else(|| TillprintError::Driver(format!("no address for {target}")))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| TillprintError::Driver(format!("raw TCP connect to {addr}: {e}")))?;
        stream.set_write_timeout(Some(self.timeout))?;
        info!(addr = %addr, "Connected via raw TCP");

        Ok(Box::new(RawSocketDevice {
            name: name.to_string(),
            stream: Some(stream),
            sent: 0,
        }))
    }
}

struct RawSocketDevice {
    name: String,
    stream: Option<TcpStream>,
    sent: usize,
}

impl RawSocketDevice {
    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "raw TCP stream closed"))
    }
}

impl Device for RawSocketDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        // 8 KiB chunks so a stalled printer trips the write timeout early.
        for chunk in bytes.chunks(8192) {
            self.stream()?.write_all(chunk)?;
            self.sent += chunk.len();
            debug!(sent = self.sent, "raw TCP progress");
        }
        Ok(())
    }

    fn commit(&mut self) -> io::Result<()> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "raw TCP stream closed"))?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;
        info!(printer = %self.name, total = self.sent, "raw TCP job sent");
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                warn!(printer = %self.name, error = %e, "raw TCP shutdown failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Sends `host:port` names to the raw socket driver and everything else to
/// the spooler.
#[derive(Debug, Clone)]
pub struct AutoDriver {
    spooler: SpoolerDriver,
    raw: RawSocketDriver,
}

impl AutoDriver {
    pub fn new(raw_timeout: Duration, spooler_timeout: Duration) -> Self {
        Self {
            spooler: SpoolerDriver::new(spooler_timeout),
            raw: RawSocketDriver::new(raw_timeout),
        }
    }
}

impl DeviceDriver for AutoDriver {
    fn open(&self, name: &str) -> Result<Box<dyn Device>> {
        if has_port(name) {
            self.raw.open(name)
        } else {
            self.spooler.open(name)
        }
    }
}

/// `host:port` with a numeric port. CUPS queue names cannot contain ':'.
fn has_port(name: &str) -> bool {
    match name.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
