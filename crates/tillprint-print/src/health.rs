// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service health report served on `GET /health`.

use std::time::Duration;

use serde::Serialize;

use tillprint_core::types::{PrinterSummary, SummaryStatus, WorkerStatistics};

/// Build metadata baked in at compile time.
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub env: String,
    pub version: &'static str,
    pub date: &'static str,
}

impl BuildInfo {
    /// `date` comes from `TILLPRINT_BUILD_DATE` at compile time, if set.
    pub fn new(env: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            version: env!("CARGO_PKG_VERSION"),
            date: option_env!("TILLPRINT_BUILD_DATE").unwrap_or("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueHealth {
    pub current: usize,
    pub capacity: usize,
    /// Fill level in percent.
    pub utilization: f64,
}

impl QueueHealth {
    pub fn new(current: usize, capacity: usize) -> Self {
        let utilization = if capacity == 0 {
            0.0
        } else {
            (current as f64 / capacity as f64 * 1000.0).round() / 10.0
        };
        Self {
            current,
            capacity,
            utilization,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerHealth {
    pub running: bool,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
}

impl From<&WorkerStatistics> for WorkerHealth {
    fn from(stats: &WorkerStatistics) -> Self {
        Self {
            running: stats.running,
            jobs_processed: stats.jobs_processed,
            jobs_failed: stats.jobs_failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub queue: QueueHealth,
    pub worker: WorkerHealth,
    pub printers: PrinterSummary,
    pub build: BuildInfo,
    pub uptime_seconds: u64,
}

impl HealthReport {
    /// Degraded when no physical printer can be found.
    pub fn new(
        queue: (usize, usize),
        worker: &WorkerStatistics,
        printers: PrinterSummary,
        build: BuildInfo,
        uptime: Duration,
    ) -> Self {
        let status = match printers.status {
            SummaryStatus::Error => HealthStatus::Degraded,
            SummaryStatus::Ok | SummaryStatus::Warning => HealthStatus::Ok,
        };
        Self {
            status,
            queue: QueueHealth::new(queue.0, queue.1),
            worker: WorkerHealth::from(worker),
            printers,
            build,
            uptime_seconds: uptime.as_secs(),
        }
    }
}
