// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// WebSocket connection gateway.
//
// Every POS client gets one task running its read loop. Requests are answered
// inline; print jobs are only queued here and their results arrive later
// through the `Notifier` impl, possibly interleaved with replies. Both paths
// write through the connection's own sink lock, so frames never interleave.
// Every write and every close is bounded by the configured write timeout, so
// a client that stops reading cannot pin its sink lock or stall shutdown.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::future::join_all;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tillprint_core::config::ServiceConfig;
use tillprint_core::error::{Result, TillprintError};
use tillprint_core::types::{ConnectionId, JobId, PrintJob, PrinterSummary};

use crate::auth::AuthGate;
use crate::discovery::DiscoveryCache;
use crate::origin::OriginPolicy;
use crate::protocol::{ClientMessage, Envelope, ServerMessage, payload_is_empty};
use crate::queue::JobQueue;
use crate::rate_limit::{RateLimiter, WINDOW};
use crate::registry::ClientRegistry;
use crate::worker::Notifier;

/// Close code sent when a client's session ends normally.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent to every client when the service shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

const MSG_RATE_LIMITED: &str = "Rate limited: too many print jobs, retry in a minute";
const MSG_UNAUTHORIZED: &str = "Authentication failed: invalid token";
const MSG_MISSING_PAYLOAD: &str = "Field 'datos' is required for type 'ticket'";
const MSG_QUEUE_FULL: &str = "Queue full, please retry in a few seconds";
const MSG_SHUTTING_DOWN: &str = "Print service is shutting down";

/// One registered WebSocket client.
pub struct ClientConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    write_timeout: Duration,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl ClientConnection {
    fn new(id: ConnectionId, sink: SplitSink<WebSocket, Message>, write_timeout: Duration) -> Self {
        Self {
            id,
            sink: Mutex::new(sink),
            write_timeout,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Serialize and write one message, waiting at most the write timeout
    /// for both the sink lock and the write itself.
    pub async fn send(&self, message: &ServerMessage) -> Result<()> {
        if self.is_closed() {
            return Err(TillprintError::Notify(format!("{} is closed", self.id)));
        }
        let text = message.to_json()?;
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(text)).await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TillprintError::Notify(format!("write to {} failed: {e}", self.id))),
            Err(_) => Err(TillprintError::Notify(format!(
                "write to {} timed out after {:?}",
                self.id, self.write_timeout
            ))),
        }
    }

    /// Send a close frame and stop the read loop. Only the first call acts.
    ///
    /// A client that is not reading gets no close frame: once the write
    /// timeout expires the connection is dropped as it is.
    pub async fn close(&self, code: u16, reason: &'static str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handshake = async {
            let mut sink = self.sink.lock().await;
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                debug!(connection = %self.id, error = %e, "Close frame not delivered");
            }
            if let Err(e) = sink.close().await {
                debug!(connection = %self.id, error = %e, "Sink close failed");
            }
        };
        if tokio::time::timeout(self.write_timeout, handshake).await.is_err() {
            warn!(connection = %self.id, timeout = ?self.write_timeout, "Client not reading, dropping connection");
            return;
        }
        debug!(connection = %self.id, code, "Connection closed");
    }
}

/// Accepts POS clients, answers their requests and delivers job results.
pub struct Gateway {
    registry: ClientRegistry<ClientConnection>,
    queue: Arc<JobQueue>,
    discovery: Arc<DiscoveryCache>,
    limiter: RateLimiter,
    auth: Arc<dyn AuthGate>,
    origins: OriginPolicy,
    write_timeout: Duration,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        config: &ServiceConfig,
        queue: Arc<JobQueue>,
        discovery: Arc<DiscoveryCache>,
        auth: Arc<dyn AuthGate>,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(),
            queue,
            discovery,
            limiter: RateLimiter::new(config.max_jobs_per_minute),
            auth,
            origins: OriginPolicy::new(config.allowed_origins.iter().cloned()),
            write_timeout: config.notify_timeout(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn origin_policy(&self) -> &OriginPolicy {
        &self.origins
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn printer_summary(&self) -> PrinterSummary {
        self.discovery.summary().await
    }

    /// Run one upgraded connection until it ends.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, peer: SocketAddr) {
        let (sink, mut stream) = socket.split();
        let id = self.registry.next_id();
        let conn = Arc::new(ClientConnection::new(id, sink, self.write_timeout));
        self.registry.add(id, Arc::clone(&conn));
        info!(connection = %id, clients = self.registry.count(), "Client connected");

        if self.is_shutting_down() {
            self.registry.remove(id);
            conn.close(CLOSE_GOING_AWAY, "service shutting down").await;
            return;
        }
        if let Err(e) = conn.send(&ServerMessage::Welcome).await {
            warn!(connection = %id, error = %e, "Failed to send welcome");
        }

        loop {
            let frame = tokio::select! {
                _ = conn.cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                frame = stream.next() => frame,
            };
            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        debug!(connection = %id, "Binary frame is not UTF-8");
                        break;
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "Read failed");
                    break;
                }
            };

            let Some(reply) = self.respond(id, peer.ip(), &text).await else {
                break;
            };
            if let Err(e) = conn.send(&reply).await {
                warn!(connection = %id, error = %e, "Failed to send reply");
                break;
            }
        }

        self.registry.remove(id);
        let code = if self.is_shutting_down() {
            CLOSE_GOING_AWAY
        } else {
            CLOSE_NORMAL
        };
        conn.close(code, "").await;
        info!(connection = %id, clients = self.registry.count(), "Client disconnected");
    }

    /// Answer one inbound frame. `None` means the frame was not JSON and the
    /// connection should end.
    pub async fn respond(&self, origin: ConnectionId, peer_ip: IpAddr, text: &str) -> Option<ServerMessage> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection = %origin, error = %e, "Invalid JSON from client");
                return None;
            }
        };

        let reply = match ClientMessage::try_from(envelope) {
            Ok(ClientMessage::SubmitJob { id, payload, token }) => {
                self.submit(origin, peer_ip, id, payload, token.as_deref())
            }
            Ok(ClientMessage::QueryStatus) => {
                let (current, capacity) = self.queue.status();
                ServerMessage::Status { current, capacity }
            }
            Ok(ClientMessage::Ping { id }) => ServerMessage::Pong { id },
            Ok(ClientMessage::ListPrinters) => self.list_printers().await,
            Err(unknown) => {
                debug!(connection = %origin, kind = %unknown.kind, "Unknown message type");
                ServerMessage::error(unknown.id.as_deref(), unknown.to_string())
            }
        };
        Some(reply)
    }

    fn submit(
        &self,
        origin: ConnectionId,
        peer_ip: IpAddr,
        id: Option<String>,
        payload: Option<serde_json::Value>,
        token: Option<&str>,
    ) -> ServerMessage {
        let client_id = id.as_deref();
        let payload = match self.admit(peer_ip, token, payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(connection = %origin, error = %e, "Job refused");
                return ServerMessage::error(client_id, client_message(&e));
            }
        };

        let job_id = JobId::from_client(client_id);
        match self.queue.enqueue(PrintJob::new(job_id.clone(), origin, payload)) {
            Ok(()) => {
                let (current, capacity) = self.queue.status();
                info!(job_id = %job_id, connection = %origin, current, capacity, "Job queued");
                ServerMessage::Ack {
                    id: job_id,
                    current,
                    capacity,
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Job rejected");
                ServerMessage::error(Some(job_id.as_str()), client_message(&e))
            }
        }
    }

    /// Admission checks, cheapest first: rate limit, token, payload.
    fn admit(
        &self,
        peer_ip: IpAddr,
        token: Option<&str>,
        payload: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let identity = peer_ip.to_string();
        if !self.limiter.allow(&identity) {
            return Err(TillprintError::RateLimited(identity));
        }
        if !self.auth.authorize(token) {
            return Err(TillprintError::Unauthorized);
        }
        match payload {
            Some(payload) if !payload_is_empty(Some(&payload)) => Ok(payload),
            _ => Err(TillprintError::Protocol(MSG_MISSING_PAYLOAD.into())),
        }
    }

    async fn list_printers(&self) -> ServerMessage {
        match self.discovery.get(false).await {
            Ok(snapshot) => {
                if let Some(err) = &snapshot.refresh_error {
                    warn!(error = %err, "Serving stale printer list");
                }
                let summary = PrinterSummary::from_printers(&snapshot.printers);
                ServerMessage::PrinterList {
                    printers: snapshot.printers,
                    summary,
                }
            }
            Err(e) => ServerMessage::error(None, format!("Failed to list printers: {e}")),
        }
    }

    /// Periodically forget rate-limit identities that went quiet.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WINDOW);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = gateway.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = gateway.limiter.evict_idle();
                        if evicted > 0 {
                            debug!(evicted, tracked = gateway.limiter.tracked(), "Evicted idle rate-limit entries");
                        }
                    }
                }
            }
        })
    }

    /// Close every connection with 1001 and refuse new ones. Safe to call
    /// more than once. Connections close concurrently, so the whole call
    /// takes at most one write timeout.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let clients = self.registry.snapshot();
        info!(clients = clients.len(), "Closing client connections");
        join_all(clients.into_iter().map(|(id, conn)| async move {
            self.registry.remove(id);
            conn.close(CLOSE_GOING_AWAY, "service shutting down").await;
        }))
        .await;
    }
}

/// Text shown to the client for a refused submission.
fn client_message(error: &TillprintError) -> String {
    match error {
        TillprintError::RateLimited(_) => MSG_RATE_LIMITED.into(),
        TillprintError::Unauthorized => MSG_UNAUTHORIZED.into(),
        TillprintError::QueueFull { .. } => MSG_QUEUE_FULL.into(),
        TillprintError::QueueClosed => MSG_SHUTTING_DOWN.into(),
        TillprintError::Protocol(message) => message.clone(),
        other => other.to_string(),
    }
}

impl Notifier for Gateway {
    async fn notify(&self, origin: ConnectionId, message: ServerMessage) -> Result<()> {
        let Some(conn) = self.registry.get(origin) else {
            debug!(connection = %origin, kind = message.kind(), "Client gone, dropping message");
            return Ok(());
        };
        conn.send(&message).await
    }
}
