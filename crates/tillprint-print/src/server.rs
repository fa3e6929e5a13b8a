// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP front door: `GET /ws` upgrades to the print gateway, `GET /health`
// reports service health.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tillprint_core::error::{Result, TillprintError};

use crate::gateway::Gateway;
use crate::health::{BuildInfo, HealthReport};
use crate::worker::Worker;

/// Shared state injected into the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub worker: Arc<Worker<Gateway>>,
    pub build: BuildInfo,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, worker: Arc<Worker<Gateway>>, build: BuildInfo) -> Self {
        Self {
            gateway,
            worker,
            build,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` fires, then drain in-flight HTTP requests.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Print service listening (ws://{addr}/ws)");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| TillprintError::Server(e.to_string()))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());

    if !state.gateway.origin_policy().allows(origin, host) {
        warn!(peer = %peer, origin = ?origin, "WebSocket origin rejected");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    if state.gateway.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "service shutting down").into_response();
    }

    let gateway = Arc::clone(&state.gateway);
    ws.on_upgrade(move |socket| gateway.handle_socket(socket, peer))
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let printers = state.gateway.printer_summary().await;
    Json(HealthReport::new(
        state.gateway.queue().status(),
        &state.worker.stats(),
        printers,
        state.build.clone(),
        state.started_at.elapsed(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use tillprint_core::config::ServiceConfig;
    use tillprint_core::types::ConnectionId;
    use tillprint_document::EscPosExecutor;

    use crate::auth::TokenGate;
    use crate::discovery::DiscoveryCache;
    use crate::gateway::tests::ScriptedEnumerator;
    use crate::pipeline::JobPipeline;
    use crate::pipeline::tests::CaptureDriver;
    use crate::protocol::ServerMessage;
    use crate::queue::JobQueue;
    use crate::worker::Notifier;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct TestServer {
        addr: SocketAddr,
        state: AppState,
        driver: Arc<CaptureDriver>,
        shutdown: CancellationToken,
        handle: JoinHandle<Result<()>>,
    }

    async fn start(config: ServiceConfig) -> TestServer {
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let discovery = Arc::new(DiscoveryCache::new(
            Arc::new(ScriptedEnumerator::new(usize::MAX)),
            config.discovery_ttl(),
        ));
        let gateway = Arc::new(Gateway::new(
            &config,
            Arc::clone(&queue),
            discovery,
            Arc::new(TokenGate::new(config.auth_token.as_deref())),
        ));
        let driver = Arc::new(CaptureDriver::default());
        let pipeline = JobPipeline::new(driver.clone(), Arc::new(EscPosExecutor), config.default_printer.clone());
        let worker = Arc::new(Worker::new(queue, pipeline, Arc::clone(&gateway)));
        worker.start();

        let state = AppState::new(gateway, worker, BuildInfo::new("test"));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, state.clone(), shutdown.clone()));
        TestServer {
            addr,
            state,
            driver,
            shutdown,
            handle,
        }
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("connect");
        ws
    }

    async fn next_json(ws: &mut Client) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("frame");
        match msg {
            Message::Text(text) => serde_json::from_str(&text).expect("json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// The ack and the job result race each other; return them as
    /// `(ack, result)` whatever order they arrived in.
    async fn ack_and_result(ws: &mut Client) -> (serde_json::Value, serde_json::Value) {
        let first = next_json(ws).await;
        let second = next_json(ws).await;
        if first["tipo"] == "ack" {
            (first, second)
        } else {
            (second, first)
        }
    }

    async fn wait_for_clients(state: &AppState, count: usize) {
        for _ in 0..100 {
            if state.gateway.connection_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} registered clients");
    }

    async fn next_close_code(ws: &mut Client) -> u16 {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("message in time")
                .expect("stream open")
                .expect("frame");
            if let Message::Close(frame) = msg {
                return frame.map(|f| u16::from(f.code)).unwrap_or_default();
            }
        }
    }

    #[tokio::test]
    async fn welcome_then_ping() {
        let server = start(ServiceConfig::default()).await;
        let mut ws = connect(server.addr).await;

        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["tipo"], "info");
        assert_eq!(welcome["status"], "connected");

        ws.send(Message::Text(r#"{"tipo":"ping","id":"p-1"}"#.into())).await.expect("send");
        let pong = next_json(&mut ws).await;
        assert_eq!(pong["tipo"], "pong");
        assert_eq!(pong["id"], "p-1");
        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn ticket_is_acked_then_printed() {
        let server = start(ServiceConfig::default()).await;
        let mut ws = connect(server.addr).await;
        next_json(&mut ws).await;

        let ticket = serde_json::json!({
            "tipo": "ticket",
            "id": "T-100",
            "datos": {
                "version": "1.0",
                "profile": { "model": "PT-210", "paper_width": 58 },
                "commands": [
                    { "type": "text", "data": { "content": "Total 12,50" } },
                    { "type": "cut" }
                ]
            }
        });
        ws.send(Message::Text(ticket.to_string())).await.expect("send");

        let (ack, result) = ack_and_result(&mut ws).await;
        assert_eq!(ack["tipo"], "ack");
        assert_eq!(ack["id"], "T-100");
        assert_eq!(ack["status"], "queued");

        assert_eq!(result["tipo"], "result");
        assert_eq!(result["id"], "T-100");
        assert_eq!(result["status"], "success", "{result}");
        assert!(!server.driver.device.committed().is_empty());
        assert_eq!(server.state.worker.stats().jobs_processed, 1);
        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn empty_document_gets_one_error_result() {
        let server = start(ServiceConfig::default()).await;
        let mut ws = connect(server.addr).await;
        next_json(&mut ws).await;

        ws.send(Message::Text(r#"{"tipo":"ticket","id":"E-1","datos":"{}"}"#.into()))
            .await
            .expect("send");
        let (ack, result) = ack_and_result(&mut ws).await;
        assert_eq!(ack["tipo"], "ack");
        assert_eq!(result["tipo"], "result");
        assert_eq!(result["status"], "error");
        assert_eq!(result["mensaje"], "VALIDATION: Missing 'version' field");

        ws.send(Message::Text(r#"{"tipo":"status"}"#.into())).await.expect("send");
        let status = next_json(&mut ws).await;
        assert_eq!(status["tipo"], "status");
        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn foreign_origin_is_forbidden() {
        let server = start(ServiceConfig::default()).await;
        let mut request = format!("ws://{}/ws", server.addr).into_client_request().expect("request");
        request
            .headers_mut()
            .insert("origin", HeaderValue::from_static("http://evil.example"));

        match connect_async(request).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("cross-origin upgrade accepted"),
        }
        assert_eq!(server.state.gateway.connection_count(), 0);
        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn same_origin_is_accepted() {
        let server = start(ServiceConfig::default()).await;
        let mut request = format!("ws://{}/ws", server.addr).into_client_request().expect("request");
        let origin = HeaderValue::from_str(&format!("http://{}", server.addr)).expect("header");
        request.headers_mut().insert("origin", origin);

        let (mut ws, _) = connect_async(request).await.expect("connect");
        assert_eq!(next_json(&mut ws).await["tipo"], "info");
        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn invalid_json_closes_normally() {
        let server = start(ServiceConfig::default()).await;
        let mut ws = connect(server.addr).await;
        next_json(&mut ws).await;

        ws.send(Message::Text("not json".into())).await.expect("send");
        assert_eq!(next_close_code(&mut ws).await, 1000);
        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_closes_clients_going_away() {
        let server = start(ServiceConfig::default()).await;
        let mut first = connect(server.addr).await;
        let mut second = connect(server.addr).await;
        next_json(&mut first).await;
        next_json(&mut second).await;

        server.state.worker.stop().await;
        server.state.gateway.queue().close();
        server.state.gateway.shutdown().await;
        server.state.gateway.shutdown().await;

        assert_eq!(next_close_code(&mut first).await, 1001);
        assert_eq!(next_close_code(&mut second).await, 1001);
        assert_eq!(server.state.gateway.connection_count(), 0);

        server.shutdown.cancel();
        let served = tokio::time::timeout(Duration::from_secs(5), server.handle)
            .await
            .expect("server stopped in time")
            .expect("join");
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn result_write_to_idle_reader_times_out() {
        let config = ServiceConfig {
            notify_timeout_secs: 1,
            ..ServiceConfig::default()
        };
        let server = start(config).await;
        // Connected but never read from again.
        let _idle = connect(server.addr).await;
        wait_for_clients(&server.state, 1).await;

        let bulky = "x".repeat(1 << 20);
        let mut failure = None;
        for _ in 0..512 {
            let started = Instant::now();
            let sent = server
                .state
                .gateway
                .notify(ConnectionId(1), ServerMessage::error(None, bulky.clone()))
                .await;
            assert!(started.elapsed() < Duration::from_secs(3), "write not bounded");
            if let Err(e) = sent {
                failure = Some(e);
                break;
            }
        }
        match failure {
            Some(TillprintError::Notify(msg)) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("expected a timed-out write, got {other:?}"),
        }
        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_is_not_held_up_by_client_that_stopped_reading() {
        let config = ServiceConfig {
            notify_timeout_secs: 2,
            ..ServiceConfig::default()
        };
        let server = start(config).await;
        let mut ws = connect(server.addr).await;
        next_json(&mut ws).await;

        // Large pings whose pongs are never read fill both socket buffers
        // and leave the server blocked mid-reply.
        let flood = tokio::spawn(async move {
            let ping = serde_json::json!({ "tipo": "ping", "id": "p".repeat(64 * 1024) }).to_string();
            for _ in 0..2000 {
                if ws.send(Message::Text(ping.clone())).await.is_err() {
                    break;
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(5), server.state.gateway.shutdown())
            .await
            .expect("shutdown finished in time");
        assert!(started.elapsed() < Duration::from_secs(5));
        wait_for_clients(&server.state, 0).await;

        server.shutdown.cancel();
        flood.abort();
    }

    #[tokio::test]
    async fn health_endpoint_reports_state() {
        let server = start(ServiceConfig::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.expect("connect");
        let request = format!(
            "GET /health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            server.addr
        );
        stream.write_all(request.as_bytes()).await.expect("write");
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.expect("read");

        assert!(raw.starts_with("HTTP/1.1 200"), "{raw}");
        let body = raw.split("\r\n\r\n").nth(1).expect("body");
        let json: serde_json::Value = serde_json::from_str(body).expect("json");
        assert_eq!(json["status"], "ok");
        assert_eq!(json["queue"]["capacity"], 50);
        assert_eq!(json["worker"]["running"], true);
        assert_eq!(json["printers"]["thermal_count"], 1);
        assert_eq!(json["build"]["env"], "test");
        server.shutdown.cancel();
    }
}
