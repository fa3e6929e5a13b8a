// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Signal handling.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel the returned token on SIGTERM or SIGINT.
///
/// If a handler cannot be installed the daemon keeps running and only the
/// remaining signal can stop it.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| warn!(error = %e, "Cannot install SIGTERM handler"))
            .ok();
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| warn!(error = %e, "Cannot install SIGINT handler"))
            .ok();

        tokio::select! {
            Some(_) = recv(&mut sigterm) => info!("Received SIGTERM, shutting down"),
            Some(_) = recv(&mut sigint) => info!("Received SIGINT, shutting down"),
            else => return,
        }
        trigger.cancel();
    });

    token
}

async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => None,
    }
}
