// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer device abstraction and the per-job print service.

use std::io;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::escpos::EscPosEncoder;
use crate::profile::PrinterProfile;

/// An open connection to one printer.
///
/// Implementations live in `tillprint-print` (spooler, raw socket). All
/// methods are blocking; callers run them off the async runtime.
pub trait Device: Send {
    fn name(&self) -> &str;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Hand everything written so far to the printer.
    fn commit(&mut self) -> io::Result<()>;

    /// Discard anything written and release the device.
    fn abort(&mut self);
}

/// In-memory device that records committed bytes.
///
/// Cloning shares the same buffer, so a caller can keep a handle and inspect
/// the output after the device has been moved into a service.
#[derive(Debug, Clone, Default)]
pub struct CaptureDevice {
    name: String,
    pending: Vec<u8>,
    committed: Arc<Mutex<Vec<u8>>>,
    aborted: Arc<Mutex<bool>>,
}

impl CaptureDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn committed(&self) -> Vec<u8> {
        self.committed.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.lock().map(|a| *a).unwrap_or(false)
    }
}

impl Device for CaptureDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> io::Result<()> {
        let mut committed = self
            .committed
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?;
        committed.append(&mut self.pending);
        Ok(())
    }

    fn abort(&mut self) {
        self.pending.clear();
        if let Ok(mut aborted) = self.aborted.lock() {
            *aborted = true;
        }
    }
}

/// Print service for a single job: a resolved profile, an encoder, and the
/// open device.
///
/// The device is released exactly once: `finish` commits it, and dropping an
/// unfinished service (error or panic mid-document) aborts it.
pub struct PrinterService {
    profile: PrinterProfile,
    encoder: EscPosEncoder,
    device: Box<dyn Device>,
    finished: bool,
}

impl PrinterService {
    pub fn new(profile: PrinterProfile, device: Box<dyn Device>) -> Self {
        debug!(device = device.name(), model = %profile.model, "Print service created");
        Self {
            profile,
            encoder: EscPosEncoder::new(),
            device,
            finished: false,
        }
    }

    pub fn profile(&self) -> &PrinterProfile {
        &self.profile
    }

    pub fn encoder(&mut self) -> &mut EscPosEncoder {
        &mut self.encoder
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Write the encoded document and commit it to the device.
    pub fn finish(mut self) -> io::Result<usize> {
        let bytes = self.encoder.take();
        self.device.write_all(&bytes)?;
        self.device.commit()?;
        self.finished = true;
        debug!(device = self.device.name(), bytes = bytes.len(), "Document committed");
        Ok(bytes.len())
    }
}

impl Drop for PrinterService {
    fn drop(&mut self) {
        if !self.finished {
            warn!(device = self.device.name(), "Print service dropped before finish, aborting");
            self.device.abort();
        }
    }
}
