//! `RelayServer`: Axum HTTP + WebSocket server.

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use futures::FutureExt;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::relay::{Departure, DisconnectReason, Relay};
use crate::shutdown::ShutdownCoordinator;
use crate::status;
use crate::websocket::session::{Heartbeat, run_ws_session};

/// Smallest per-connection outbound queue: room for the welcome and history frames.
const MIN_OUTBOUND_QUEUE: usize = 2;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry, history and fan-out.
    pub relay: Arc<Relay>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Every upgraded connection task.
    pub sessions: TaskTracker,
    /// When the server started.
    pub start_time: Instant,
    /// Heartbeat timings for new sessions.
    pub heartbeat: Heartbeat,
    /// Outbound queue capacity for new sessions.
    pub outbound_queue: usize,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The scale relay server.
pub struct RelayServer {
    config: ServerConfig,
    relay: Arc<Relay>,
    shutdown: Arc<ShutdownCoordinator>,
    sessions: TaskTracker,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        Self {
            relay: Arc::new(Relay::new(&config)),
            config,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            sessions: TaskTracker::new(),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: Arc::clone(&self.relay),
            shutdown: Arc::clone(&self.shutdown),
            sessions: self.sessions.clone(),
            start_time: self.start_time,
            heartbeat: Heartbeat {
                ping_interval: self.config.ping_interval,
                pong_timeout: self.config.pong_timeout,
            },
            outbound_queue: self.config.outbound_queue,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(status_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown is requested.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        info!(%addr, "scale relay listening");
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            match served {
                Ok(()) => info!("http server stopped"),
                Err(e) => error!(error = %e, "http server failed"),
            }
        });
        Ok((addr, handle))
    }

    /// Get the relay.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Tracker holding one task per upgraded connection.
    ///
    /// After [`TaskTracker::close`], `wait()` resolves once every session has left.
    pub fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /
async fn status_handler(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());
    let ws_url = format!("{}://{host}/ws", status::ws_scheme(proto));
    Html(status::render_status_page(
        &ws_url,
        state.relay.connection_count(),
        state.start_time.elapsed().as_secs(),
    ))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.relay.connection_count(),
        state.relay.history_len(),
        relay_core::clock::now(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| sessions.track_future(handle_socket(socket, addr, state)))
}

/// Join, run the session, and always leave, even if the session panics.
async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let (tx, rx) = mpsc::channel(state.outbound_queue.max(MIN_OUTBOUND_QUEUE));
    let connection = match state.relay.join(addr, tx) {
        Ok(connection) => connection,
        Err(e) => {
            error!(%addr, error = %e, "failed to admit connection");
            return;
        }
    };
    let client_id = connection.id;

    let session = run_ws_session(
        socket,
        connection,
        rx,
        Arc::clone(&state.relay),
        state.heartbeat,
        state.shutdown.token(),
    );
    let _ = supervise(&state.relay, client_id, session).await;
}

/// Await `session`, then remove `client_id` from the relay whether the
/// session returned or panicked.
async fn supervise<F>(relay: &Relay, client_id: u64, session: F) -> Option<Departure>
where
    F: Future<Output = DisconnectReason>,
{
    let reason = match AssertUnwindSafe(session).catch_unwind().await {
        Ok(reason) => reason,
        Err(panic) => {
            error!(client_id, panic = %panic_message(&*panic), "session panicked");
            DisconnectReason::Panicked
        }
    };
    relay.leave(client_id, reason)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ClientConnection;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        RelayServer::new(ServerConfig::default(), handle)
    }

    async fn get_body(app: Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
        let mut req = Request::builder().uri(uri);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.relay().connection_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let (status, body) = get_body(server.router(), "/health", &[]).await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["historyLength"], 0);
        assert!(parsed["uptime"].is_number());
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn status_page_uses_host_header() {
        let server = make_server();
        let (status, body) = get_body(
            server.router(),
            "/",
            &[("host", "scale.example.com"), ("x-forwarded-proto", "https")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("wss://scale.example.com/ws"));
        assert!(body.contains("<strong>Active Connections:</strong> 0"));
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let server = make_server();
        let (status, _body) = get_body(server.router(), "/metrics", &[]).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _body) = get_body(server.router(), "/nonexistent", &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    fn joined(server: &RelayServer) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = server
            .relay()
            .join(SocketAddr::from(([127, 0, 0, 1], 40000)), tx)
            .unwrap();
        (conn, rx)
    }

    #[tokio::test]
    async fn supervise_leaves_after_panicking_session() {
        let server = make_server();
        let (conn, _rx) = joined(&server);
        let (_peer, _peer_rx) = joined(&server);

        let session = async {
            if conn.id > 0 {
                panic!("session blew up");
            }
            DisconnectReason::ClientClosed
        };
        let departure = supervise(server.relay(), conn.id, session).await.unwrap();

        assert_eq!(departure.client_id, conn.id);
        assert_eq!(departure.reason, DisconnectReason::Panicked);
        assert!(server.relay().lookup(conn.id).is_none());
        assert_eq!(server.relay().connection_count(), 1);
    }

    #[tokio::test]
    async fn supervise_leaves_with_session_reason() {
        let server = make_server();
        let (conn, _rx) = joined(&server);

        let session = async { DisconnectReason::HeartbeatTimeout };
        let departure = supervise(server.relay(), conn.id, session).await.unwrap();
        assert_eq!(departure.reason, DisconnectReason::HeartbeatTimeout);
        assert_eq!(server.relay().connection_count(), 0);
    }

    #[tokio::test]
    async fn supervise_after_leave_is_noop() {
        let server = make_server();
        let (conn, _rx) = joined(&server);
        let _ = server.relay().leave(conn.id, DisconnectReason::Shutdown);

        let session = async { DisconnectReason::StreamEnded };
        let departure = supervise(server.relay(), conn.id, session).await;
        assert!(departure.is_none());
    }

    #[tokio::test]
    async fn sessions_tracker_idle_resolves_after_close() {
        let server = make_server();
        let _ = server.sessions().close();
        tokio::time::timeout(std::time::Duration::from_secs(1), server.sessions().wait())
            .await
            .unwrap();
    }

    #[test]
    fn panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(&*owned), "boom");
        let borrowed: Box<dyn Any + Send> = Box::new("bang");
        assert_eq!(panic_message(&*borrowed), "bang");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*other), "unknown panic");
    }
}
