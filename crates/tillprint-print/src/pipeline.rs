// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-job print pipeline.
//
// decode payload -> validate -> pick printer -> open device -> resolve
// profile -> execute document -> commit
//
// Everything after decoding is blocking (spooler, sockets), so a job runs on
// the blocking pool. That thread is also the panic boundary: a panic inside
// a driver or the executor fails that one job and nothing else.

use std::any::Any;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, instrument};

use tillprint_core::error::TillprintError;
use tillprint_core::types::PrintJob;
use tillprint_document::{
    Document, DocumentExecutor, ExecutionError, PrinterProfile, PrinterService, ValidationError,
};

use crate::driver::DeviceDriver;

/// Why a job did not print. The `Display` chain is what gets classified for
/// the client.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("failed to parse document: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("invalid document: {0}")]
    Invalid(#[source] ValidationError),

    #[error("printer name not specified")]
    NoPrinter,

    #[error("error connecting to printer '{name}': {source}")]
    Connect {
        name: String,
        #[source]
        source: TillprintError,
    },

    #[error("error executing document: {0}")]
    Execute(#[source] ExecutionError),

    #[error("error executing document: device write failed: {0}")]
    Commit(#[source] io::Error),

    #[error("print job panicked: {0}")]
    Panicked(String),

    #[error("print job aborted: {0}")]
    Aborted(String),
}

/// Everything a job needs besides its payload.
#[derive(Clone)]
pub struct JobPipeline {
    driver: Arc<dyn DeviceDriver>,
    executor: Arc<dyn DocumentExecutor>,
    default_printer: Option<String>,
}

impl JobPipeline {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        executor: Arc<dyn DocumentExecutor>,
        default_printer: Option<String>,
    ) -> Self {
        Self {
            driver,
            executor,
            default_printer,
        }
    }

    /// Run one job to completion on the blocking pool and report how long it
    /// took.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn run(&self, job: &PrintJob) -> Result<Duration, JobFailure> {
        let payload = job.payload.clone();
        let pipeline = self.clone();
        let started = Instant::now();

        let joined = tokio::task::spawn_blocking(move || pipeline.execute_blocking(&payload)).await;
        match joined {
            Ok(result) => result.map(|bytes| {
                let elapsed = started.elapsed();
                debug!(bytes, elapsed_ms = elapsed.as_millis() as u64, "Job printed");
                elapsed
            }),
            Err(err) if err.is_panic() => Err(JobFailure::Panicked(panic_message(err.into_panic()))),
            Err(err) => Err(JobFailure::Aborted(err.to_string())),
        }
    }

    /// The pipeline proper. Returns the number of bytes sent to the printer.
    pub fn execute_blocking(&self, payload: &serde_json::Value) -> Result<usize, JobFailure> {
        let document = Document::from_payload(payload).map_err(JobFailure::Parse)?;
        document.validate().map_err(JobFailure::Invalid)?;

        let name = printer_name(&document, self.default_printer.as_deref()).ok_or(JobFailure::NoPrinter)?;
        let device = self
            .driver
            .open(&name)
            .map_err(|source| JobFailure::Connect { name: name.clone(), source })?;

        let profile = PrinterProfile::resolve(&document.profile);
        debug!(printer = %name, model = %profile.model, width = profile.paper_width_mm, "Printing document");

        // Dropping the service on any early return aborts the device.
        let mut service = PrinterService::new(profile, device);
        self.executor
            .execute(&document, &mut service)
            .map_err(JobFailure::Execute)?;
        service.finish().map_err(JobFailure::Commit)
    }
}

/// `profile.model` if set, else the configured default.
fn printer_name(document: &Document, default_printer: Option<&str>) -> Option<String> {
    let model = document.profile.model.trim();
    if !model.is_empty() {
        return Some(model.to_string());
    }
    default_printer
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
