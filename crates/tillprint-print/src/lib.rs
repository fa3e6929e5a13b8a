// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tillprint Print — WebSocket gateway, bounded job queue, printer discovery
// and the single print worker. This crate connects POS clients to the
// document executor in `tillprint-document` and the printers on this host.

pub mod auth;
pub mod discovery;
pub mod driver;
pub mod gateway;
pub mod health;
pub mod origin;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod server;
pub mod worker;

pub use auth::{AuthGate, TokenGate};
pub use discovery::{DiscoveryCache, LpstatEnumerator, PrinterEnumerator};
pub use driver::{AutoDriver, DeviceDriver, RawSocketDriver, SpoolerDriver};
pub use gateway::Gateway;
pub use pipeline::{JobFailure, JobPipeline};
pub use queue::JobQueue;
pub use rate_limit::RateLimiter;
pub use server::{AppState, serve};
pub use worker::{Notifier, Worker};
