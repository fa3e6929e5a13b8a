// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The print worker.
//
// A single task drains the job queue in arrival order. Each job runs through
// the pipeline; its result is then handed to the notifier on a separate task
// so a slow or dead client never holds up the next job.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tillprint_core::error::Result;
use tillprint_core::human_errors::classify_failure;
use tillprint_core::types::{ConnectionId, JobOutcome, PrintJob, WorkerState, WorkerStatistics};

use crate::pipeline::JobPipeline;
use crate::protocol::ServerMessage;
use crate::queue::JobQueue;

/// Delivers a message to the connection a job came from.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, origin: ConnectionId, message: ServerMessage) -> impl Future<Output = Result<()>> + Send;
}

struct Control {
    state: WorkerState,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

pub struct Worker<N> {
    queue: Arc<JobQueue>,
    pipeline: JobPipeline,
    notifier: Arc<N>,
    stats: Arc<Mutex<WorkerStatistics>>,
    control: Mutex<Control>,
}

impl<N: Notifier> Worker<N> {
    pub fn new(queue: Arc<JobQueue>, pipeline: JobPipeline, notifier: Arc<N>) -> Self {
        Self {
            queue,
            pipeline,
            notifier,
            stats: Arc::new(Mutex::new(WorkerStatistics::default())),
            control: Mutex::new(Control {
                state: WorkerState::Stopped,
                running: None,
            }),
        }
    }

    /// Spawn the worker loop. Does nothing if already running.
    pub fn start(&self) {
        let Ok(mut control) = self.control.lock() else {
            error!("Worker control state poisoned, cannot start");
            return;
        };
        if control.state != WorkerState::Stopped {
            debug!(state = ?control.state, "Worker already started");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.queue),
            self.pipeline.clone(),
            Arc::clone(&self.notifier),
            Arc::clone(&self.stats),
            cancel.clone(),
        ));
        control.running = Some((cancel, handle));
        control.state = WorkerState::Running;
        set_running(&self.stats, true);
        info!("Print worker started");
    }

    /// Stop taking jobs and wait for the one in progress to finish.
    pub async fn stop(&self) {
        let running = match self.control.lock() {
            Ok(mut control) => {
                if control.state != WorkerState::Running {
                    return;
                }
                control.state = WorkerState::Stopping;
                control.running.take()
            }
            Err(_) => None,
        };

        if let Some((cancel, handle)) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }

        if let Ok(mut control) = self.control.lock() {
            control.state = WorkerState::Stopped;
        }
        set_running(&self.stats, false);
        let stats = self.stats();
        info!(
            processed = stats.jobs_processed,
            failed = stats.jobs_failed,
            "Print worker stopped"
        );
    }

    pub fn state(&self) -> WorkerState {
        self.control
            .lock()
            .map(|c| c.state)
            .unwrap_or(WorkerState::Stopped)
    }

    pub fn stats(&self) -> WorkerStatistics {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

fn set_running(stats: &Mutex<WorkerStatistics>, running: bool) {
    if let Ok(mut stats) = stats.lock() {
        stats.running = running;
    }
}

async fn run_loop<N: Notifier>(
    queue: Arc<JobQueue>,
    pipeline: JobPipeline,
    notifier: Arc<N>,
    stats: Arc<Mutex<WorkerStatistics>>,
    cancel: CancellationToken,
) {
    debug!("Waiting for print jobs");
    // `dequeue` returns `None` on cancellation or when the queue is closed
    // and drained. A job already taken always runs to completion.
    while let Some(job) = queue.dequeue(&cancel).await {
        process_job(job, &pipeline, &notifier, &stats).await;
    }
    debug!("Worker loop exited");
}

async fn process_job<N: Notifier>(
    job: PrintJob,
    pipeline: &JobPipeline,
    notifier: &Arc<N>,
    stats: &Mutex<WorkerStatistics>,
) {
    info!(job_id = %job.id, origin = %job.origin, "Processing job");
    let result = pipeline.run(&job).await;

    let (outcome, message) = match result {
        Ok(elapsed) => {
            info!(job_id = %job.id, elapsed_ms = elapsed.as_millis() as u64, "Job completed");
            (
                JobOutcome::Success,
                format!("Print completed in {}ms", elapsed.as_millis()),
            )
        }
        Err(failure) => {
            let detail = failure.to_string();
            let classified = classify_failure(&detail);
            error!(
                job_id = %job.id,
                category = classified.category.as_str(),
                error = %detail,
                "Job failed"
            );
            (JobOutcome::Error, classified.to_string())
        }
    };

    if let Ok(mut stats) = stats.lock() {
        match outcome {
            JobOutcome::Success => stats.jobs_processed += 1,
            JobOutcome::Error => stats.jobs_failed += 1,
        }
        stats.last_job_at = Some(Utc::now());
    }

    let response = ServerMessage::Result {
        id: job.id.clone(),
        outcome,
        message,
    };
    let notifier = Arc::clone(notifier);
    let (job_id, origin) = (job.id, job.origin);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(origin, response).await {
            warn!(job_id = %job_id, origin = %origin, error = %e, "Failed to notify client");
        }
    });
}
