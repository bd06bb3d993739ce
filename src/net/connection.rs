//! Connection bookkeeping: ids, outbound channels, liveness and routing.
//!
//! A connection's inbound messages are owned by exactly one handler at a
//! time, either the session manager or one game session. The [`RouteTable`]
//! models that ownership as a single entry per connection, swapped atomically
//! when a connection moves between idle, queued and in-session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use crate::game::session::SessionCommand;
use crate::net::protocol::{self, ServerMessage};

/// Opaque connection handle, unique per live connection
pub type ConnectionId = u64;

/// Sender half of a connection's outbound message channel; a per-connection
/// writer task drains it into the WebSocket sink
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Current owner of a connection's inbound messages
#[derive(Clone)]
pub enum Route {
    /// Idle or queued: frames go to the session manager
    Manager,
    /// In a session: frames go to that session's command channel
    Session(mpsc::UnboundedSender<SessionCommand>),
}

/// Single-owner routing table keyed by connection id
pub struct RouteTable {
    routes: RwLock<HashMap<ConnectionId, Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: RwLock::new(HashMap::new()) }
    }

    /// Register a new connection, routed to the manager, and return its id
    pub async fn register(&self) -> ConnectionId {
        let mut routes = self.routes.write().await;
        let id = loop {
            let candidate = rand::random::<ConnectionId>();
            if !routes.contains_key(&candidate) {
                break candidate;
            }
        };
        routes.insert(id, Route::Manager);
        id
    }

    /// Hand a connection's inbound messages to a session
    pub async fn assign_session(
        &self,
        id: ConnectionId,
        commands: mpsc::UnboundedSender<SessionCommand>,
    ) {
        if let Some(route) = self.routes.write().await.get_mut(&id) {
            *route = Route::Session(commands);
        }
    }

    /// Hand a connection's inbound messages back to the manager
    pub async fn release(&self, id: ConnectionId) {
        if let Some(route) = self.routes.write().await.get_mut(&id) {
            *route = Route::Manager;
        }
    }

    /// Like [`release`](Self::release), but only when the connection still
    /// belongs to the given session. A stale end-of-session report must not
    /// clobber a route that was already handed to a newer session.
    pub async fn release_from(
        &self,
        id: ConnectionId,
        commands: &mpsc::UnboundedSender<SessionCommand>,
    ) {
        if let Some(route) = self.routes.write().await.get_mut(&id) {
            if matches!(route, Route::Session(tx) if tx.same_channel(commands)) {
                *route = Route::Manager;
            }
        }
    }

    /// Drop a closed connection from the table
    pub async fn remove(&self, id: ConnectionId) {
        self.routes.write().await.remove(&id);
    }

    pub async fn route_of(&self, id: ConnectionId) -> Option<Route> {
        self.routes.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness flag for the ping/pong heartbeat
pub struct Liveness {
    alive: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self { alive: AtomicBool::new(true) }
    }

    /// Called when a transport pong arrives
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Returns whether the previous probe was answered and arms the next one
    pub fn check_and_reset(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe a connection every `period`, tolerating exactly one outstanding
/// round-trip. A missed pong forcibly terminates the connection via `kill`.
/// The returned task must be aborted when the connection closes.
pub fn spawn_heartbeat(
    conn: ConnectionId,
    outbound: Outbound,
    liveness: Arc<Liveness>,
    kill: watch::Sender<bool>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut probe = interval(period);
        probe.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        probe.tick().await;
        loop {
            probe.tick().await;
            if !liveness.check_and_reset() {
                warn!("connection {} missed heartbeat, terminating", conn);
                let _ = outbound.send(Message::Close(None));
                let _ = kill.send(true);
                break;
            }
            if outbound.send(Message::Ping(Vec::new())).is_err() {
                break;
            }
        }
    })
}

/// Encode and send one frame on a connection's outbound channel.
///
/// An encode failure downgrades the frame to an `error` frame for this send
/// only. Returns false when the connection's writer is gone.
pub fn send_frame(outbound: &Outbound, frame: &ServerMessage) -> bool {
    let text = match protocol::encode(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("dropping outbound frame: {}", e);
            let fallback = ServerMessage::Error { message: e.to_string() };
            match protocol::encode(&fallback) {
                Ok(text) => text,
                Err(_) => return true,
            }
        }
    };
    outbound.send(Message::Text(text)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_routes_to_manager() {
        let table = RouteTable::new();
        let id = table.register().await;
        assert!(matches!(table.route_of(id).await, Some(Route::Manager)));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_route_swap_and_release() {
        let table = RouteTable::new();
        let id = table.register().await;

        let (tx, _rx) = mpsc::unbounded_channel();
        table.assign_session(id, tx).await;
        assert!(matches!(table.route_of(id).await, Some(Route::Session(_))));

        table.release(id).await;
        assert!(matches!(table.route_of(id).await, Some(Route::Manager)));
    }

    #[tokio::test]
    async fn test_release_from_ignores_stale_session() {
        let table = RouteTable::new();
        let id = table.register().await;

        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();
        table.assign_session(id, old_tx.clone()).await;
        table.assign_session(id, new_tx).await;

        // The old session's release must not displace the new one
        table.release_from(id, &old_tx).await;
        assert!(matches!(table.route_of(id).await, Some(Route::Session(_))));
    }

    #[tokio::test]
    async fn test_remove_drops_route() {
        let table = RouteTable::new();
        let id = table.register().await;
        table.remove(id).await;
        assert!(table.route_of(id).await.is_none());
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn test_assign_unknown_connection_is_noop() {
        let table = RouteTable::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        table.assign_session(42, tx).await;
        assert!(table.route_of(42).await.is_none());
    }

    #[test]
    fn test_liveness_round_trip() {
        let liveness = Liveness::new();
        // Fresh connection counts as alive for the first probe
        assert!(liveness.check_and_reset());
        // No pong since the last probe
        assert!(!liveness.check_and_reset());
        liveness.mark_alive();
        assert!(liveness.check_and_reset());
    }

    #[tokio::test]
    async fn test_send_frame_delivers_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(send_frame(&tx, &ServerMessage::Stopped));
        match rx.recv().await.unwrap() {
            Message::Text(text) => assert_eq!(text, r#"{"type":"stopped"}"#),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_frame_downgrades_bad_state() {
        use crate::game::physics::Physics;
        use crate::game::settings::GameSettings;

        let physics = Physics::new(GameSettings::default());
        let mut state = physics.state().clone();
        state.ball.vx = f64::INFINITY;

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(send_frame(&tx, &ServerMessage::State(state)));
        match rx.recv().await.unwrap() {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "error");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
