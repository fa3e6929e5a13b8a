// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TillprintError};

/// Queue capacity used when the configured value is zero.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Daemon settings, persisted as `config.json` in the data directory.
///
/// Every field has a default so a partial file is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Socket address the HTTP/WebSocket listener binds to.
    pub listen_addr: String,
    /// Deployment label reported by the health endpoint (e.g. "local", "remote").
    pub environment: String,
    /// Maximum number of queued (not yet executing) print jobs.
    pub queue_capacity: usize,
    /// Per-client job submissions allowed in any trailing 60-second window.
    pub max_jobs_per_minute: usize,
    /// Printer used when a document does not name one in `profile.model`.
    pub default_printer: Option<String>,
    /// Allowed WebSocket origins. Empty means same-origin only.
    pub allowed_origins: Vec<String>,
    /// Shared token required on job submissions. `None` disables the check.
    pub auth_token: Option<String>,
    /// Lifetime of the printer discovery snapshot.
    pub discovery_ttl_secs: u64,
    /// Upper bound on any single write or close handshake with a client.
    pub notify_timeout_secs: u64,
    /// Connect/write timeout for raw socket (port 9100) printers.
    pub raw_socket_timeout_secs: u64,
    /// Longest a single `lp` hand-off may take before it is killed.
    pub spooler_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8766".into(),
            environment: "local".into(),
            queue_capacity: 50,
            max_jobs_per_minute: 30,
            default_printer: None,
            allowed_origins: Vec::new(),
            auth_token: None,
            discovery_ttl_secs: 30,
            notify_timeout_secs: 5,
            raw_socket_timeout_secs: 10,
            spooler_timeout_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// Normalise the loaded values and reject the ones we cannot work with.
    ///
    /// A zero queue capacity is clamped to [`DEFAULT_QUEUE_CAPACITY`]; empty
    /// strings in optional fields are treated as unset.
    pub fn validate(mut self) -> Result<Self> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(TillprintError::Config(format!(
                "listen_addr '{}' is not a socket address",
                self.listen_addr
            )));
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = DEFAULT_QUEUE_CAPACITY;
        }
        if self.max_jobs_per_minute == 0 {
            return Err(TillprintError::Config(
                "max_jobs_per_minute must be at least 1".into(),
            ));
        }
        if self.discovery_ttl_secs == 0 {
            self.discovery_ttl_secs = 1;
        }
        if self.notify_timeout_secs == 0 {
            self.notify_timeout_secs = 5;
        }
        if self.raw_socket_timeout_secs == 0 {
            self.raw_socket_timeout_secs = 10;
        }
        if self.spooler_timeout_secs == 0 {
            self.spooler_timeout_secs = 30;
        }
        self.default_printer = self.default_printer.filter(|p| !p.trim().is_empty());
        self.auth_token = self.auth_token.filter(|t| !t.is_empty());
        self.allowed_origins.retain(|o| !o.trim().is_empty());
        for origin in &self.allowed_origins {
            glob::Pattern::new(origin.trim()).map_err(|e| {
                TillprintError::Config(format!("allowed_origins entry '{origin}' is not a valid pattern: {e}"))
            })?;
        }
        Ok(self)
    }

    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn raw_socket_timeout(&self) -> Duration {
        Duration::from_secs(self.raw_socket_timeout_secs)
    }

    pub fn spooler_timeout(&self) -> Duration {
        Duration::from_secs(self.spooler_timeout_secs)
    }
}
