// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service wiring: builds every subsystem from the configuration, runs them,
// and tears them down in order when asked to stop.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tillprint_core::config::ServiceConfig;
use tillprint_core::error::{Result, TillprintError};
use tillprint_document::EscPosExecutor;
use tillprint_print::health::BuildInfo;
use tillprint_print::{
    AppState, AutoDriver, DeviceDriver, DiscoveryCache, Gateway, JobPipeline, JobQueue,
    LpstatEnumerator, PrinterEnumerator, TokenGate, Worker, serve,
};

pub struct Daemon {
    config: ServiceConfig,
    queue: Arc<JobQueue>,
    discovery: Arc<DiscoveryCache>,
    gateway: Arc<Gateway>,
    worker: Arc<Worker<Gateway>>,
    auth: Arc<TokenGate>,
}

impl Daemon {
    /// Wire the daemon against the host's spooler and network printers.
    pub fn new(config: ServiceConfig) -> Self {
        let driver = Arc::new(AutoDriver::new(config.raw_socket_timeout(), config.spooler_timeout()));
        Self::with_backends(config, driver, Arc::new(LpstatEnumerator))
    }

    pub fn with_backends(
        config: ServiceConfig,
        driver: Arc<dyn DeviceDriver>,
        enumerator: Arc<dyn PrinterEnumerator>,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let discovery = Arc::new(DiscoveryCache::new(enumerator, config.discovery_ttl()));
        let auth = Arc::new(TokenGate::new(config.auth_token.as_deref()));
        let gateway = Arc::new(Gateway::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&discovery),
            auth.clone(),
        ));
        let pipeline = JobPipeline::new(driver, Arc::new(EscPosExecutor), config.default_printer.clone());
        let worker = Arc::new(Worker::new(Arc::clone(&queue), pipeline, Arc::clone(&gateway)));

        Self {
            config,
            queue,
            discovery,
            gateway,
            worker,
            auth,
        }
    }

    /// Run until `shutdown` fires or the listener fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            listen = %self.config.listen_addr,
            env = %self.config.environment,
            queue_capacity = self.queue.capacity(),
            max_jobs_per_minute = self.config.max_jobs_per_minute,
            default_printer = ?self.config.default_printer,
            same_origin_only = self.gateway.origin_policy().is_same_origin_only(),
            auth = self.auth.is_enabled(),
            "Starting Tillprint"
        );

        self.discovery.log_startup_diagnostics().await;

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| TillprintError::Server(format!("bind {}: {e}", self.config.listen_addr)))?;

        self.worker.start();
        let maintenance = self.gateway.spawn_maintenance();

        let state = AppState::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.worker),
            BuildInfo::new(self.config.environment.clone()),
        );
        let http_stop = CancellationToken::new();
        let mut server = tokio::spawn(serve(listener, state, http_stop.clone()));

        let finished_early = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = &mut server => Some(result),
        };
        if finished_early.is_some() {
            warn!("HTTP server stopped unexpectedly");
        }

        info!("Shutting down");
        self.worker.stop().await;
        self.queue.close();
        self.gateway.shutdown().await;
        http_stop.cancel();

        let served = match finished_early {
            Some(result) => result,
            None => server.await,
        };
        if let Err(e) = maintenance.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }

        let stats = self.worker.stats();
        info!(
            processed = stats.jobs_processed,
            failed = stats.jobs_failed,
            "Tillprint stopped"
        );
        served.map_err(|e| TillprintError::Server(format!("server task failed: {e}")))?
    }
}
