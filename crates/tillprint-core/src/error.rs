// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified service-level error type for Tillprint.
//
// Per-job failures (parse, validation, device, execution) have their own
// type in `tillprint-print::pipeline` because they are classified and sent
// back to clients rather than propagated.

use thiserror::Error;

/// Top-level error type for Tillprint service operations.
#[derive(Debug, Error)]
pub enum TillprintError {
    // -- Queue / admission --
    #[error("queue full ({current}/{capacity})")]
    QueueFull { current: usize, capacity: usize },

    #[error("job queue is closed")]
    QueueClosed,

    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("request not authorized")]
    Unauthorized,

    // -- Printers --
    #[error("printer discovery failed: {0}")]
    Discovery(String),

    #[error("printer driver error: {0}")]
    Driver(String),

    // -- Connections --
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client notification failed: {0}")]
    Notify(String),

    #[error("print server error: {0}")]
    Server(String),

    // -- Configuration / persistence --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TillprintError>;
