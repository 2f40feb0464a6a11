//! WebSocket client connection state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_core::{ConnectionRole, RelayError, SourceGroupId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Registration state, written only from the owning connection's message path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registration {
    /// Declared role.
    pub role: ConnectionRole,
    /// Declared scale.
    pub source_group: SourceGroupId,
}

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Process-unique id, assigned by the registry.
    pub id: u64,
    /// Peer socket address.
    pub source_address: SocketAddr,
    /// Wall-clock connect time.
    pub connected_at: DateTime<Utc>,
    /// Monotonic connect time, for durations.
    started: Instant,
    registration: Mutex<Registration>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Whether the client has answered since the last heartbeat check.
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection in the `unknown` role on the default scale.
    pub fn new(id: u64, source_address: SocketAddr, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            source_address,
            connected_at: relay_core::clock::now(),
            started: now,
            registration: Mutex::new(Registration::default()),
            tx,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current role and scale.
    pub fn registration(&self) -> Registration {
        *self.registration.lock()
    }

    /// Current role.
    pub fn role(&self) -> ConnectionRole {
        self.registration.lock().role
    }

    /// Current scale.
    pub fn source_group(&self) -> SourceGroupId {
        self.registration.lock().source_group
    }

    /// Overwrite role and scale.
    pub fn set_registration(&self, role: ConnectionRole, source_group: SourceGroupId) {
        *self.registration.lock() = Registration { role, source_group };
    }

    /// Queue a text frame without waiting.
    ///
    /// A full queue counts as a dropped message; a closed queue means the
    /// writer task has already gone away.
    pub fn try_deliver(&self, frame: Arc<String>) -> relay_core::Result<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::SendFailure {
                    client_id: self.id,
                    reason: "outbound queue full",
                })
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::SendFailure {
                client_id: self.id,
                reason: "connection closed",
            }),
        }
    }

    /// Frames dropped because the outbound queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record client activity (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag. `true` if the client was heard from since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since connect.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("source_address", &self.source_address)
            .field("registration", &self.registration())
            .finish_non_exhaustive()
    }
}
