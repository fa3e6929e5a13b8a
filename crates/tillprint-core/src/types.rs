// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Tillprint print daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a print job.
///
/// Clients usually supply their own (ticket numbers, order ids); when they
/// don't, a UUIDv4 is generated so ids stay unique for the life of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use the client-supplied id, or generate one when it is absent or blank.
    pub fn from_client(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a live client connection in the registry.
///
/// Jobs carry this key instead of the connection itself, so a job never keeps
/// a closed connection alive; the notifier looks the key up again before
/// writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A print request accepted from a client and waiting for the worker.
///
/// Lives only in memory: created on a successful `ticket` submission and
/// dropped once the worker has dispatched its result.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: JobId,
    /// Connection the result must be reported to.
    pub origin: ConnectionId,
    /// Raw, unvalidated document payload as received.
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(id: JobId, origin: ConnectionId, payload: serde_json::Value) -> Self {
        Self {
            id,
            origin,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Outcome reported in a `result` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Error,
}

/// Spooler state of an installed printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterStatus {
    Ready,
    Printing,
    Paused,
    Offline,
    Error,
    Unknown,
}

impl PrinterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Offline => "offline",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Coarse classification of an installed printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterClass {
    /// Receipt / POS style device.
    Thermal,
    /// Office, label, or anything we could not identify.
    Other,
}

/// One installed printer as reported by the enumeration capability.
///
/// The discovery cache never edits these records, it only swaps the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterRecord {
    pub name: String,
    pub port: String,
    pub driver: String,
    pub status: PrinterStatus,
    pub is_default: bool,
    pub is_virtual: bool,
    #[serde(rename = "printer_type")]
    pub class: PrinterClass,
}

impl PrinterRecord {
    pub fn is_thermal(&self) -> bool {
        self.class == PrinterClass::Thermal && !self.is_virtual
    }

    pub fn is_physical(&self) -> bool {
        !self.is_virtual
    }
}

/// Overall printer health derived from a discovery snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    /// At least one thermal printer is installed.
    Ok,
    /// Physical printers exist, but none of them is thermal.
    Warning,
    /// No physical printer (or enumeration failed with nothing cached).
    Error,
}

/// Lightweight printer overview for health checks and `get_printers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterSummary {
    pub status: SummaryStatus,
    pub detected_count: usize,
    pub thermal_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_name: Option<String>,
}

impl PrinterSummary {
    /// Summarise a snapshot.
    pub fn from_printers(printers: &[PrinterRecord]) -> Self {
        let thermal_count = printers.iter().filter(|p| p.is_thermal()).count();
        let physical_count = printers.iter().filter(|p| p.is_physical()).count();

        let status = if thermal_count > 0 {
            SummaryStatus::Ok
        } else if physical_count > 0 {
            SummaryStatus::Warning
        } else {
            SummaryStatus::Error
        };

        Self {
            status,
            detected_count: printers.len(),
            thermal_count,
            default_name: printers
                .iter()
                .find(|p| p.is_default)
                .map(|p| p.name.clone()),
        }
    }

    /// Summary used when enumeration failed and no snapshot exists.
    pub fn unavailable() -> Self {
        Self {
            status: SummaryStatus::Error,
            detected_count: 0,
            thermal_count: 0,
            default_name: None,
        }
    }
}

/// Running counters of the print worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatistics {
    pub running: bool,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_at: Option<DateTime<Utc>>,
}

/// Lifecycle of the print worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
}
