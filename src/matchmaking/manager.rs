//! Session manager: connection registry, matchmaking and session arena.
//!
//! The manager is a single task owning the queue, the session map and the
//! connection map. Everything reaches it through one event channel, so no
//! state here needs a lock. Sessions report back on a second channel when
//! they reach a terminal state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::match_result::{MatchResult, ResultStore};
use crate::game::physics::PlayerSide;
use crate::game::session::{
    GameSession, Participant, SessionCommand, SessionEnded, SessionOutcome,
};
use crate::game::settings::GameSettings;
use crate::matchmaking::queue::{MatchQueue, QueuedEntry};
use crate::net::connection::{send_frame, ConnectionId, Outbound, RouteTable};
use crate::net::protocol::{ClientMessage, MatchPlayers, ServerMessage, UserProfile};

/// Events delivered to the manager task
#[derive(Debug)]
pub enum ManagerEvent {
    /// A connection finished its handshake
    Connected { conn: ConnectionId, outbound: Outbound },
    /// A decoded frame from a connection currently routed to the manager
    Frame { conn: ConnectionId, msg: ClientMessage },
    /// A connection closed
    Disconnected { conn: ConnectionId },
}

/// Manager-side view of a live session
struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    participants: Vec<ConnectionId>,
    /// Present for online sessions, drives result reporting
    profiles: Option<MatchPlayers>,
}

/// Owns matchmaking and the set of live sessions
pub struct SessionManager {
    tick_rate: u32,
    routes: Arc<RouteTable>,
    connections: HashMap<ConnectionId, Outbound>,
    queue: MatchQueue,
    sessions: HashMap<Uuid, SessionHandle>,
    ended_tx: mpsc::UnboundedSender<SessionEnded>,
    results: ResultStore,
}

impl SessionManager {
    pub fn new(
        tick_rate: u32,
        routes: Arc<RouteTable>,
        ended_tx: mpsc::UnboundedSender<SessionEnded>,
        results: ResultStore,
    ) -> Self {
        Self {
            tick_rate,
            routes,
            connections: HashMap::new(),
            queue: MatchQueue::new(),
            sessions: HashMap::new(),
            ended_tx,
            results,
        }
    }

    /// Drive the manager until both channels close
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ManagerEvent>,
        mut ended: mpsc::UnboundedReceiver<SessionEnded>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                report = ended.recv() => match report {
                    Some(report) => self.handle_session_ended(report).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_event(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::Connected { conn, outbound } => {
                self.connections.insert(conn, outbound);
                info!("connection {} registered, {} total", conn, self.connections.len());
            }
            ManagerEvent::Frame { conn, msg } => self.handle_frame(conn, msg).await,
            ManagerEvent::Disconnected { conn } => {
                self.connections.remove(&conn);
                self.queue.remove_player(conn);
                info!("connection {} removed, {} total", conn, self.connections.len());
            }
        }
    }

    async fn handle_frame(&mut self, conn: ConnectionId, msg: ClientMessage) {
        match msg {
            ClientMessage::Local1v1 { settings } => self.start_local(conn, settings).await,
            ClientMessage::QueueJoin { user } => self.enqueue(conn, user).await,
            ClientMessage::Ping => {
                if let Some(outbound) = self.connections.get(&conn) {
                    let _ = outbound.send(Message::Pong(Vec::new()));
                }
            }
            // Session-scoped commands are only valid while routed to a session
            _ => {
                if let Some(outbound) = self.connections.get(&conn) {
                    send_frame(
                        outbound,
                        &ServerMessage::Error { message: "Unexpected message type".to_string() },
                    );
                }
            }
        }
    }

    /// Set up a local session on one connection with client-supplied settings
    async fn start_local(&mut self, conn: ConnectionId, settings: GameSettings) {
        let Some(outbound) = self.connections.get(&conn).cloned() else {
            return;
        };
        self.queue.remove_player(conn);

        let session =
            GameSession::local(conn, outbound.clone(), settings, self.tick_rate, self.ended_tx.clone());
        let id = session.id();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        send_frame(
            &outbound,
            &ServerMessage::GameReady {
                match_id: id,
                settings: session.settings().clone(),
                players: None,
            },
        );

        self.routes.assign_session(conn, cmd_tx.clone()).await;
        self.sessions
            .insert(id, SessionHandle { cmd_tx, participants: vec![conn], profiles: None });
        tokio::spawn(session.run(cmd_rx));
        info!("local session {} created for connection {}", id, conn);
    }

    /// Add a player to the queue and start a session once a pair is waiting
    async fn enqueue(&mut self, conn: ConnectionId, user: UserProfile) {
        if !self.connections.contains_key(&conn) {
            return;
        }
        // Absent guest flags are recorded explicitly so the profiles
        // announced in game-ready and started are never ambiguous
        let user = UserProfile { is_guest: Some(user.is_guest.unwrap_or(true)), ..user };
        if !self.queue.add_player(conn, user) {
            return;
        }
        info!("connection {} queued, {} waiting", conn, self.queue.len());
        if let Some((first, second)) = self.queue.take_pair() {
            self.start_online(first, second).await;
        }
    }

    /// Create a session for a matched pair, server-default settings
    async fn start_online(&mut self, first: QueuedEntry, second: QueuedEntry) {
        let (Some(out1), Some(out2)) = (
            self.connections.get(&first.conn).cloned(),
            self.connections.get(&second.conn).cloned(),
        ) else {
            return;
        };

        let profiles =
            MatchPlayers { player1: first.user.clone(), player2: second.user.clone() };
        let session = GameSession::online(
            Participant { conn: first.conn, outbound: out1.clone() },
            Participant { conn: second.conn, outbound: out2.clone() },
            profiles.clone(),
            self.tick_rate,
            self.ended_tx.clone(),
        );
        let id = session.id();
        let settings = session.settings().clone();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let ready = ServerMessage::GameReady {
            match_id: id,
            settings,
            players: Some(profiles.clone()),
        };
        // A participant whose announcement cannot be delivered is treated as
        // already gone, the session then stops and notifies the survivor
        for (conn, outbound) in [(first.conn, &out1), (second.conn, &out2)] {
            if !send_frame(outbound, &ready) {
                let _ = cmd_tx.send(SessionCommand::Disconnected { conn });
            }
        }

        self.routes.assign_session(first.conn, cmd_tx.clone()).await;
        self.routes.assign_session(second.conn, cmd_tx.clone()).await;
        self.sessions.insert(
            id,
            SessionHandle {
                cmd_tx,
                participants: vec![first.conn, second.conn],
                profiles: Some(profiles),
            },
        );
        tokio::spawn(session.run(cmd_rx));
        info!(
            "online session {} created for connections {} and {}",
            id, first.conn, second.conn
        );
    }

    /// A session reached a terminal state: route participants back to the
    /// manager and report online results
    async fn handle_session_ended(&mut self, report: SessionEnded) {
        let Some(handle) = self.sessions.remove(&report.id) else {
            return;
        };
        for conn in &report.participants {
            if self.connections.contains_key(conn) {
                self.routes.release_from(*conn, &handle.cmd_tx).await;
            }
        }
        info!("session {} ended: {:?}", report.id, report.outcome);

        if let (
            SessionOutcome::Finished { winner, score, play_time_secs },
            Some(profiles),
        ) = (report.outcome, handle.profiles)
        {
            let result = MatchResult {
                id: report.id,
                time: play_time_secs,
                player1: profiles.player1.name,
                player2: profiles.player2.name,
                player1_won: winner == PlayerSide::P1,
                score,
            };
            let store = self.results.clone();
            tokio::spawn(async move {
                if let Err(e) = store.submit(&result).await {
                    warn!("failed to report result for match {}: {}", result.id, e);
                }
            });
        }
    }
}
