//! The relay context: connection lifecycle, inbound dispatch and fan-out.
//!
//! Registry and history share one lock. Joining (register, welcome, history
//! snapshot) and recording a reading (append, fan-out) each happen inside a
//! single critical section, so a new connection gets its history before any
//! live broadcast and never misses a reading recorded concurrently. Every
//! enqueue inside the lock is a non-blocking `try_send`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use relay_core::{
    ConnectionRole, Envelope, HistoryBuffer, Inbound, Pong, Reading, RelayError, Result, Welcome,
    classify, clock, parse_payload,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::metrics::{
    RELAY_BROADCAST_DELIVERIES_TOTAL, RELAY_BROADCAST_DROPS_TOTAL, RELAY_CONNECTION_DURATION_SECONDS,
    RELAY_CONNECTIONS_ACTIVE, RELAY_CONNECTIONS_TOTAL, RELAY_DISCONNECTIONS_TOTAL,
    RELAY_MALFORMED_TOTAL, RELAY_READINGS_TOTAL, RELAY_UNRECOGNIZED_TOTAL,
};
use crate::websocket::connection::{ClientConnection, Registration};
use crate::websocket::registry::ConnectionRegistry;

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a close frame.
    ClientClosed,
    /// The inbound stream ended without a close frame.
    StreamEnded,
    /// Reading from the socket failed.
    Transport,
    /// The client stopped answering pings.
    HeartbeatTimeout,
    /// Writing to the socket failed.
    WriteFailed,
    /// The server is shutting down.
    Shutdown,
    /// The session task panicked.
    Panicked,
}

impl DisconnectReason {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::StreamEnded => "stream_ended",
            Self::Transport => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::WriteFailed => "write_failed",
            Self::Shutdown => "shutdown",
            Self::Panicked => "panicked",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a connection that has left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Departure {
    /// Id of the departed connection.
    pub client_id: u64,
    /// Role at the time of departure.
    pub role: ConnectionRole,
    /// Time between join and leave.
    pub duration: Duration,
    /// Why it ended.
    pub reason: DisconnectReason,
}

/// Per-peer results of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the frame was queued for.
    pub delivered: usize,
    /// Peers whose queue was full or closed.
    pub failed: usize,
}

/// What handling one inbound payload did.
#[derive(Debug)]
pub enum HandleOutcome {
    /// Role and scale were updated.
    Registered(Registration),
    /// A pong was queued for the sender.
    Ponged,
    /// A reading was recorded and fanned out.
    Broadcast(BroadcastReport),
    /// Nothing changed; the payload was malformed, unrecognized or could not be answered.
    Ignored(RelayError),
    /// The connection had already left.
    Closed,
}

struct RelayState {
    registry: ConnectionRegistry,
    history: HistoryBuffer,
}

/// Shared relay state, one per server.
pub struct Relay {
    state: Mutex<RelayState>,
    history_replay: usize,
    welcome_message: String,
}

impl Relay {
    /// Create an empty relay.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            state: Mutex::new(RelayState {
                registry: ConnectionRegistry::new(),
                history: HistoryBuffer::new(config.history_capacity),
            }),
            history_replay: config.history_replay,
            welcome_message: config.welcome_message.clone(),
        }
    }

    /// Register a new connection and queue its welcome and history frames.
    ///
    /// The history frame is skipped when no reading has been recorded yet.
    pub fn join(
        &self,
        source_address: SocketAddr,
        sender: mpsc::Sender<Arc<String>>,
    ) -> Result<Arc<ClientConnection>> {
        let now = clock::now();
        let mut state = self.state.lock();
        let connection = state.registry.register(source_address, sender);

        let welcome = Envelope::Welcome(Welcome {
            client_id: connection.id,
            server_time: clock::to_iso8601(now),
            message: self.welcome_message.clone(),
        })
        .to_json();
        let recent = state.history.recent_slice(self.history_replay);
        let history = if recent.is_empty() {
            Ok(None)
        } else {
            Envelope::History(&recent).to_json().map(Some)
        };

        let (welcome, history) = match (welcome, history) {
            (Ok(welcome), Ok(history)) => (welcome, history),
            (Err(e), _) | (_, Err(e)) => {
                let _ = state.registry.unregister(connection.id);
                return Err(e);
            }
        };

        deliver_or_warn(&connection, Arc::new(welcome), "welcome");
        if let Some(history) = history {
            deliver_or_warn(&connection, Arc::new(history), "history");
        }
        let connections = state.registry.len();
        drop(state);

        counter!(RELAY_CONNECTIONS_TOTAL).increment(1);
        gauge!(RELAY_CONNECTIONS_ACTIVE).increment(1.0);
        info!(
            client_id = connection.id,
            %source_address,
            replayed = recent.len(),
            connections,
            "client connected"
        );
        Ok(connection)
    }

    /// Remove a connection. Calling it again for the same id is a no-op returning `None`.
    pub fn leave(&self, client_id: u64, reason: DisconnectReason) -> Option<Departure> {
        let connection = self.state.lock().registry.unregister(client_id)?;
        let departure = Departure {
            client_id,
            role: connection.role(),
            duration: connection.age(),
            reason,
        };

        counter!(RELAY_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(RELAY_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(RELAY_CONNECTION_DURATION_SECONDS).record(departure.duration.as_secs_f64());
        info!(
            client_id,
            role = %departure.role,
            %reason,
            duration_secs = departure.duration.as_secs_f64(),
            dropped = connection.drop_count(),
            "client disconnected"
        );
        Some(departure)
    }

    /// Parse, classify and act on one inbound text payload from `connection`.
    pub fn handle_text(&self, connection: &ClientConnection, text: &str) -> HandleOutcome {
        let client_id = connection.id;
        let payload = match parse_payload(text) {
            Ok(payload) => payload,
            Err(e) => {
                counter!(RELAY_MALFORMED_TOTAL).increment(1);
                warn!(client_id, error = %e, "dropping malformed payload");
                return HandleOutcome::Ignored(e);
            }
        };

        let now = clock::now();
        match classify(&payload, connection.source_group(), now) {
            Inbound::Register { role, source_group } => {
                if !self.state.lock().registry.update(client_id, role, source_group) {
                    return HandleOutcome::Closed;
                }
                info!(client_id, %role, scale_id = %source_group, "client registered");
                HandleOutcome::Registered(Registration { role, source_group })
            }
            Inbound::Ping => {
                let delivered = Pong::at(now.timestamp_millis())
                    .to_json()
                    .and_then(|frame| connection.try_deliver(Arc::new(frame)));
                match delivered {
                    Ok(()) => {
                        debug!(client_id, "pong queued");
                        HandleOutcome::Ponged
                    }
                    Err(e) => {
                        warn!(client_id, error = %e, "failed to answer ping");
                        HandleOutcome::Ignored(e)
                    }
                }
            }
            Inbound::Reading(reading) => self.record_and_broadcast(client_id, reading),
            Inbound::Unrecognized { reason } => {
                counter!(RELAY_UNRECOGNIZED_TOTAL).increment(1);
                warn!(client_id, reason, "dropping unrecognized payload");
                HandleOutcome::Ignored(RelayError::UnrecognizedShape(reason.to_string()))
            }
        }
    }

    /// Queue `reading` for every open connection except `exclude`.
    ///
    /// Failed enqueues are logged and counted, never propagated.
    pub fn broadcast(&self, reading: &Reading, exclude: Option<u64>) -> Result<BroadcastReport> {
        let frame = Arc::new(Envelope::Weight(reading).to_json()?);
        let state = self.state.lock();
        Ok(fan_out(&state.registry, &frame, exclude))
    }

    /// Open connection by id.
    pub fn lookup(&self, client_id: u64) -> Option<Arc<ClientConnection>> {
        self.state.lock().registry.lookup(client_id)
    }

    /// Snapshot of the open connections.
    pub fn live_connections(&self) -> Vec<Arc<ClientConnection>> {
        self.state.lock().registry.live_connections()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Number of readings held in history.
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Up to the last `n` recorded readings, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<Reading> {
        self.state.lock().history.recent_slice(n)
    }

    /// Drop every remaining registry entry. Returns how many were still registered.
    pub fn drain(&self) -> usize {
        let drained = self.state.lock().registry.drain();
        if !drained.is_empty() {
            gauge!(RELAY_CONNECTIONS_ACTIVE).set(0.0);
            warn!(remaining = drained.len(), "registry drained with connections still open");
        }
        drained.len()
    }

    fn record_and_broadcast(&self, client_id: u64, reading: Reading) -> HandleOutcome {
        let frame = match Envelope::Weight(&reading).to_json() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                error!(client_id, error = %e, "failed to serialize reading");
                return HandleOutcome::Ignored(e);
            }
        };

        let report = {
            let mut state = self.state.lock();
            if !state.registry.contains(client_id) {
                return HandleOutcome::Closed;
            }
            state.history.append(reading.clone());
            fan_out(&state.registry, &frame, Some(client_id))
        };

        counter!(RELAY_READINGS_TOTAL).increment(1);
        info!(
            client_id,
            weight = reading.value_f64(),
            unit = %reading.unit,
            scale_id = %reading.source_group,
            recipients = report.delivered,
            failed = report.failed,
            "reading broadcast"
        );
        HandleOutcome::Broadcast(report)
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Relay")
            .field("connections", &state.registry.len())
            .field("history", &state.history.len())
            .finish_non_exhaustive()
    }
}

fn fan_out(
    registry: &ConnectionRegistry,
    frame: &Arc<String>,
    exclude: Option<u64>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for peer in registry.iter().filter(|peer| Some(peer.id) != exclude) {
        match peer.try_deliver(Arc::clone(frame)) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(client_id = peer.id, error = %e, "broadcast delivery failed, skipping peer");
                report.failed += 1;
            }
        }
    }
    counter!(RELAY_BROADCAST_DELIVERIES_TOTAL).increment(report.delivered as u64);
    counter!(RELAY_BROADCAST_DROPS_TOTAL).increment(report.failed as u64);
    report
}

fn deliver_or_warn(connection: &ClientConnection, frame: Arc<String>, kind: &'static str) {
    if let Err(e) = connection.try_deliver(frame) {
        warn!(client_id = connection.id, kind, error = %e, "failed to queue greeting frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use relay_core::SourceGroupId;
    use serde_json::{Value, json};

    type Peer = (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>);

    fn relay() -> Relay {
        Relay::new(&ServerConfig::default())
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], 51000))
    }

    fn join(relay: &Relay) -> Peer {
        join_with_capacity(relay, 64)
    }

    fn join_with_capacity(relay: &Relay, capacity: usize) -> Peer {
        let (tx, rx) = mpsc::channel(capacity);
        (relay.join(addr(), tx).unwrap(), rx)
    }

    fn frames(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn send(relay: &Relay, conn: &ClientConnection, payload: &Value) -> HandleOutcome {
        relay.handle_text(conn, &payload.to_string())
    }

    fn publish(relay: &Relay, conn: &ClientConnection, weight: i64) {
        let outcome = send(relay, conn, &json!({"weight": weight}));
        assert_matches!(outcome, HandleOutcome::Broadcast(_));
    }

    // ── join / leave ────────────────────────────────────────────────

    #[test]
    fn join_sends_welcome_only_when_history_empty() {
        let relay = relay();
        let (conn, mut rx) = join(&relay);
        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "welcome");
        assert_eq!(sent[0]["data"]["clientId"], conn.id);
        assert_eq!(sent[0]["data"]["message"], "Connected to Periyar Scale Server");
        assert!(sent[0]["data"]["serverTime"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn join_assigns_increasing_ids() {
        let relay = relay();
        let (a, _ra) = join(&relay);
        let (b, _rb) = join(&relay);
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(relay.connection_count(), 2);
    }

    #[test]
    fn join_replays_last_twenty_oldest_first() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        for i in 0..30 {
            publish(&relay, &producer, i);
        }

        let (_late, mut rx) = join(&relay);
        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["type"], "welcome");
        assert_eq!(sent[1]["type"], "history");
        let weights: Vec<i64> = sent[1]["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["weight"].as_i64().unwrap())
            .collect();
        assert_eq!(weights, (10..30).collect::<Vec<_>>());
    }

    #[test]
    fn join_replays_everything_when_short() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        for i in 0..3 {
            publish(&relay, &producer, i);
        }
        let (_late, mut rx) = join(&relay);
        let sent = frames(&mut rx);
        assert_eq!(sent[1]["data"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn history_arrives_before_live_broadcast() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        publish(&relay, &producer, 1);
        let (_late, mut rx) = join(&relay);
        publish(&relay, &producer, 2);

        let sent = frames(&mut rx);
        let kinds: Vec<&str> = sent.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["welcome", "history", "weight"]);
        assert_eq!(sent[2]["data"]["weight"], 2);
    }

    #[test]
    fn leave_is_idempotent() {
        let relay = relay();
        let (conn, _rx) = join(&relay);
        let departure = relay.leave(conn.id, DisconnectReason::ClientClosed).unwrap();
        assert_eq!(departure.client_id, conn.id);
        assert_eq!(departure.role, ConnectionRole::Unknown);
        assert_eq!(departure.reason, DisconnectReason::ClientClosed);
        assert!(relay.leave(conn.id, DisconnectReason::Transport).is_none());
        assert_eq!(relay.connection_count(), 0);
    }

    #[test]
    fn leave_reports_registered_role() {
        let relay = relay();
        let (conn, _rx) = join(&relay);
        let _ = send(&relay, &conn, &json!({"type": "register", "clientType": "dashboard"}));
        let departure = relay.leave(conn.id, DisconnectReason::Shutdown).unwrap();
        assert_eq!(departure.role, ConnectionRole::Consumer);
    }

    #[test]
    fn drain_removes_everything() {
        let relay = relay();
        let (_a, _ra) = join(&relay);
        let (b, _rb) = join(&relay);
        assert_eq!(relay.drain(), 2);
        assert_eq!(relay.connection_count(), 0);
        assert!(relay.leave(b.id, DisconnectReason::Shutdown).is_none());
    }

    // ── register / ping ─────────────────────────────────────────────

    #[test]
    fn register_updates_connection_without_broadcast() {
        let relay = relay();
        let (conn, mut rx) = join(&relay);
        let (_peer, mut peer_rx) = join(&relay);
        let _ = frames(&mut rx);
        let _ = frames(&mut peer_rx);

        let outcome = send(
            &relay,
            &conn,
            &json!({"type": "register", "clientType": "esp32", "scaleId": 4}),
        );
        assert_matches!(
            outcome,
            HandleOutcome::Registered(Registration {
                role: ConnectionRole::Producer,
                ..
            })
        );
        assert_eq!(conn.source_group(), SourceGroupId::new(4).unwrap());
        assert_eq!(relay.history_len(), 0);
        assert!(frames(&mut rx).is_empty());
        assert!(frames(&mut peer_rx).is_empty());
    }

    #[test]
    fn ping_answers_sender_only() {
        let relay = relay();
        let (conn, mut rx) = join(&relay);
        let (_peer, mut peer_rx) = join(&relay);
        let _ = frames(&mut rx);
        let _ = frames(&mut peer_rx);

        assert_matches!(send(&relay, &conn, &json!({"type": "ping"})), HandleOutcome::Ponged);
        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "pong");
        assert!(sent[0]["timestamp"].as_i64().unwrap() > 0);
        assert!(frames(&mut peer_rx).is_empty());
        assert_eq!(relay.history_len(), 0);
    }

    // ── readings / broadcast ────────────────────────────────────────

    #[test]
    fn reading_reaches_every_peer_but_sender() {
        let relay = relay();
        let mut peers: Vec<Peer> = (0..5).map(|_| join(&relay)).collect();
        for (_, rx) in &mut peers {
            let _ = frames(rx);
        }

        let outcome = send(&relay, &peers[0].0, &json!({"weight": 500, "unit": "kg", "scaleId": 3}));
        assert_matches!(
            outcome,
            HandleOutcome::Broadcast(BroadcastReport {
                delivered: 4,
                failed: 0
            })
        );

        assert!(frames(&mut peers[0].1).is_empty());
        for (_, rx) in &mut peers[1..] {
            let sent = frames(rx);
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0]["type"], "weight");
            assert_eq!(sent[0]["data"]["weight"], 500);
            assert_eq!(sent[0]["data"]["unit"], "kg");
            assert_eq!(sent[0]["data"]["scaleId"], 3);
        }
        assert_eq!(relay.history_len(), 1);
    }

    #[test]
    fn value_shape_uses_sender_group() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        let (_consumer, mut rx) = join(&relay);
        let _ = frames(&mut rx);
        let _ = send(&relay, &producer, &json!({"type": "register", "clientType": "scale", "scaleId": 2}));

        let _ = send(&relay, &producer, &json!({"value": 42}));
        let sent = frames(&mut rx);
        assert_eq!(sent[0]["data"]["weight"], 42);
        assert_eq!(sent[0]["data"]["unit"], "g");
        assert_eq!(sent[0]["data"]["scaleId"], 2);
    }

    #[test]
    fn failing_peer_does_not_block_later_peers() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        let (_closed, closed_rx) = join(&relay);
        let (_full, _full_rx) = join_with_capacity(&relay, 1);
        let (_healthy, mut healthy_rx) = join(&relay);
        drop(closed_rx);
        let _ = frames(&mut healthy_rx);

        let outcome = send(&relay, &producer, &json!({"weight": 9}));
        assert_matches!(
            outcome,
            HandleOutcome::Broadcast(BroadcastReport {
                delivered: 1,
                failed: 2
            })
        );
        assert_eq!(frames(&mut healthy_rx).len(), 1);
    }

    #[test]
    fn broadcast_without_exclusion_reaches_all() {
        let relay = relay();
        let (_a, _ra) = join(&relay);
        let (_b, _rb) = join(&relay);
        let reading = Reading {
            value: 1.into(),
            unit: "g".into(),
            source_group: SourceGroupId::DEFAULT,
            produced_at: 0,
            recorded_at: String::new(),
        };
        let report = relay.broadcast(&reading, None).unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(relay.history_len(), 0);
    }

    #[test]
    fn readings_from_one_sender_keep_order() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        let (_consumer, mut rx) = join(&relay);
        let _ = frames(&mut rx);
        for i in 0..10 {
            publish(&relay, &producer, i);
        }
        let weights: Vec<i64> = frames(&mut rx)
            .iter()
            .map(|f| f["data"]["weight"].as_i64().unwrap())
            .collect();
        assert_eq!(weights, (0..10).collect::<Vec<_>>());
        let recent: Vec<i64> = relay
            .recent_history(10)
            .iter()
            .map(|r| r.value.as_i64().unwrap())
            .collect();
        assert_eq!(recent, weights);
    }

    #[test]
    fn history_capped_at_capacity() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        for i in 0..150 {
            publish(&relay, &producer, i);
        }
        assert_eq!(relay.history_len(), 100);
        assert_eq!(relay.recent_history(1)[0].value.as_i64(), Some(149));
    }

    #[test]
    fn reading_after_leave_is_dropped() {
        let relay = relay();
        let (producer, _rp) = join(&relay);
        let _ = relay.leave(producer.id, DisconnectReason::StreamEnded);
        assert_matches!(send(&relay, &producer, &json!({"weight": 1})), HandleOutcome::Closed);
        assert_eq!(relay.history_len(), 0);
    }

    // ── ignored payloads ────────────────────────────────────────────

    #[test]
    fn malformed_and_unrecognized_change_nothing() {
        let relay = relay();
        let (conn, mut rx) = join(&relay);
        let (_peer, mut peer_rx) = join(&relay);
        let _ = frames(&mut rx);
        let _ = frames(&mut peer_rx);

        assert_matches!(
            relay.handle_text(&conn, "not json"),
            HandleOutcome::Ignored(RelayError::MalformedPayload(_))
        );
        assert_matches!(
            send(&relay, &conn, &json!({})),
            HandleOutcome::Ignored(RelayError::UnrecognizedShape(_))
        );
        assert_matches!(
            send(&relay, &conn, &json!({"foo": 1})),
            HandleOutcome::Ignored(RelayError::UnrecognizedShape(_))
        );

        assert_eq!(relay.history_len(), 0);
        assert_eq!(relay.connection_count(), 2);
        assert!(frames(&mut rx).is_empty());
        assert!(frames(&mut peer_rx).is_empty());
    }

    #[test]
    fn disconnect_reason_labels() {
        assert_eq!(DisconnectReason::HeartbeatTimeout.to_string(), "heartbeat_timeout");
        assert_eq!(DisconnectReason::Panicked.as_str(), "panicked");
    }
}
