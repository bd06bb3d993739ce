//! Game session: one match, one physics instance, one tick task.
//!
//! A session owns its physics state exclusively. Participant connections feed
//! commands in through an mpsc channel, the session task is the sole drainer
//! of the input queue, the sole mutator of physics state and the sole sender
//! of broadcast frames. Terminal transitions are reported to the manager on a
//! dedicated channel so connections can be routed back and the session
//! removed from the active map.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::physics::{Physics, PlayerSide};
use crate::game::settings::GameSettings;
use crate::net::connection::{send_frame, ConnectionId, Outbound};
use crate::net::protocol::{
    ClientMessage, MatchPlayers, PaddleInput, ServerMessage, StartedPayload,
};

/// Inputs queued past this point evict the oldest; only relevant while paused
const INPUT_QUEUE_LIMIT: usize = 512;

/// Commands a session receives from its participants' connections
#[derive(Debug)]
pub enum SessionCommand {
    /// A decoded frame from a participant
    Frame { conn: ConnectionId, msg: ClientMessage },
    /// A participant's connection closed
    Disconnected { conn: ConnectionId },
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Stopped,
    Finished {
        winner: PlayerSide,
        /// Final score as "p1-p2"
        score: String,
        /// Seconds between start and finish, 0 when the clock never ran
        play_time_secs: f64,
    },
}

/// Terminal report handed to the session manager
#[derive(Debug)]
pub struct SessionEnded {
    pub id: Uuid,
    pub participants: Vec<ConnectionId>,
    pub outcome: SessionOutcome,
}

/// Session lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Paused,
    Stopped,
    Finished,
}

/// One participant connection
pub struct Participant {
    pub conn: ConnectionId,
    pub outbound: Outbound,
}

/// Variant-specific session data
pub enum SessionKind {
    /// One connection drives both paddles from a shared keyboard
    Local { player: Participant },
    /// Two connections, one paddle each, gated by a ready handshake
    Online {
        p1: Participant,
        p2: Participant,
        profiles: MatchPlayers,
        p1_ready: bool,
        p2_ready: bool,
        started_at: Option<Instant>,
    },
}

/// A single match: physics, input queue and lifecycle state
pub struct GameSession {
    id: Uuid,
    physics: Physics,
    state: SessionState,
    input_queue: VecDeque<(PlayerSide, PaddleInput)>,
    kind: SessionKind,
    tick_rate: u32,
    ended_tx: mpsc::UnboundedSender<SessionEnded>,
}

impl GameSession {
    /// Session for one connection controlling both paddles, with
    /// client-supplied settings
    pub fn local(
        conn: ConnectionId,
        outbound: Outbound,
        settings: GameSettings,
        tick_rate: u32,
        ended_tx: mpsc::UnboundedSender<SessionEnded>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            physics: Physics::new(settings),
            state: SessionState::Created,
            input_queue: VecDeque::new(),
            kind: SessionKind::Local { player: Participant { conn, outbound } },
            tick_rate,
            ended_tx,
        }
    }

    /// Session for two matched connections, with server-default settings
    pub fn online(
        p1: Participant,
        p2: Participant,
        profiles: MatchPlayers,
        tick_rate: u32,
        ended_tx: mpsc::UnboundedSender<SessionEnded>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            physics: Physics::new(GameSettings::default()),
            state: SessionState::Created,
            input_queue: VecDeque::new(),
            kind: SessionKind::Online {
                p1,
                p2,
                profiles,
                p1_ready: false,
                p2_ready: false,
                started_at: None,
            },
            tick_rate,
            ended_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn settings(&self) -> &GameSettings {
        self.physics.settings()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Stopped | SessionState::Finished)
    }

    fn participants(&self) -> Vec<ConnectionId> {
        match &self.kind {
            SessionKind::Local { player } => vec![player.conn],
            SessionKind::Online { p1, p2, .. } => vec![p1.conn, p2.conn],
        }
    }

    fn outbounds(&self) -> Vec<&Outbound> {
        match &self.kind {
            SessionKind::Local { player } => vec![&player.outbound],
            SessionKind::Online { p1, p2, .. } => vec![&p1.outbound, &p2.outbound],
        }
    }

    fn broadcast(&self, frame: &ServerMessage) {
        for outbound in self.outbounds() {
            send_frame(outbound, frame);
        }
    }

    fn broadcast_state(&self) {
        self.broadcast(&ServerMessage::State(self.physics.state().clone()));
    }

    /// Drive the session until a terminal state, then report to the manager.
    /// The ticker only gates physics while the state machine is `Running`.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / self.tick_rate as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Local clients render from state frames, push one before the clock
        // starts
        if matches!(self.kind, SessionKind::Local { .. }) {
            self.broadcast_state();
        }

        loop {
            if self.state == SessionState::Running {
                tokio::select! {
                    cmd = commands.recv() => match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => self.state = SessionState::Stopped,
                    },
                    _ = ticker.tick() => self.tick(),
                }
            } else {
                match commands.recv().await {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.state = SessionState::Stopped,
                }
                if self.state == SessionState::Running {
                    ticker.reset();
                }
            }

            if self.is_terminal() {
                break;
            }
        }

        let ended = SessionEnded {
            id: self.id,
            participants: self.participants(),
            outcome: self.outcome(),
        };
        let _ = self.ended_tx.send(ended);
    }

    fn outcome(&self) -> SessionOutcome {
        match (self.state, self.physics.winner()) {
            (SessionState::Finished, Some(winner)) => {
                let state = self.physics.state();
                let play_time_secs = match &self.kind {
                    SessionKind::Online { started_at: Some(start), .. } => {
                        start.elapsed().as_secs_f64()
                    }
                    _ => 0.0,
                };
                SessionOutcome::Finished {
                    winner,
                    score: format!("{}-{}", state.p1.score, state.p2.score),
                    play_time_secs,
                }
            }
            _ => SessionOutcome::Stopped,
        }
    }

    /// One fixed-rate step: drain queued inputs in arrival order, advance
    /// physics, broadcast, finish if a winner emerged.
    fn tick(&mut self) {
        while let Some((side, input)) = self.input_queue.pop_front() {
            self.physics.apply_input(side, &input);
        }
        self.physics.update_physics(1.0 / self.tick_rate as f64);
        self.broadcast_state();
        if let Some(winner) = self.physics.winner() {
            self.finish(winner);
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Frame { conn, msg } => self.handle_frame(conn, msg),
            SessionCommand::Disconnected { conn } => self.handle_disconnect(conn),
        }
    }

    fn handle_frame(&mut self, conn: ConnectionId, msg: ClientMessage) {
        let local = matches!(self.kind, SessionKind::Local { .. });
        match msg {
            ClientMessage::Local1v1Start if local => self.start(),
            ClientMessage::Local1v1Stop if local => self.stop(),
            ClientMessage::Local1v1Pause if local => self.pause(),
            ClientMessage::Local1v1Input { p1, p2 } if local => {
                self.enqueue_input(PlayerSide::P1, p1);
                self.enqueue_input(PlayerSide::P2, p2);
            }
            ClientMessage::OnlinePlayerReady if !local => self.mark_ready(conn),
            ClientMessage::OnlineInput { input } if !local => {
                if let Some(side) = self.side_of(conn) {
                    self.enqueue_input(side, input);
                }
            }
            _ => self.send_error_to(conn, "Unexpected message type"),
        }
    }

    fn enqueue_input(&mut self, side: PlayerSide, input: PaddleInput) {
        if self.input_queue.len() >= INPUT_QUEUE_LIMIT {
            self.input_queue.pop_front();
        }
        self.input_queue.push_back((side, input));
    }

    fn side_of(&self, conn: ConnectionId) -> Option<PlayerSide> {
        match &self.kind {
            SessionKind::Local { .. } => None,
            SessionKind::Online { p1, p2, .. } => {
                if conn == p1.conn {
                    Some(PlayerSide::P1)
                } else if conn == p2.conn {
                    Some(PlayerSide::P2)
                } else {
                    None
                }
            }
        }
    }

    fn send_error_to(&self, conn: ConnectionId, message: &str) {
        let frame = ServerMessage::Error { message: message.to_string() };
        match &self.kind {
            SessionKind::Local { player } if player.conn == conn => {
                send_frame(&player.outbound, &frame);
            }
            SessionKind::Online { p1, .. } if p1.conn == conn => {
                send_frame(&p1.outbound, &frame);
            }
            SessionKind::Online { p2, .. } if p2.conn == conn => {
                send_frame(&p2.outbound, &frame);
            }
            _ => {}
        }
    }

    /// Record a ready signal; the clock starts the instant both are true
    fn mark_ready(&mut self, conn: ConnectionId) {
        let both_ready = match &mut self.kind {
            SessionKind::Online { p1, p2, p1_ready, p2_ready, .. } => {
                if conn == p1.conn {
                    *p1_ready = true;
                    send_frame(&p1.outbound, &ServerMessage::ReadyAck);
                } else if conn == p2.conn {
                    *p2_ready = true;
                    send_frame(&p2.outbound, &ServerMessage::ReadyAck);
                } else {
                    return;
                }
                *p1_ready && *p2_ready
            }
            SessionKind::Local { .. } => return,
        };

        if both_ready && self.state != SessionState::Running {
            if let SessionKind::Online { started_at, .. } = &mut self.kind {
                if started_at.is_none() {
                    *started_at = Some(Instant::now());
                }
            }
            self.start();
        }
    }

    fn start(&mut self) {
        if self.state == SessionState::Running || self.is_terminal() {
            return;
        }
        self.state = SessionState::Running;
        let players = match &self.kind {
            SessionKind::Local { .. } => None,
            SessionKind::Online { profiles, .. } => {
                Some(StartedPayload { players: profiles.clone() })
            }
        };
        self.broadcast(&ServerMessage::Started(players));
        debug!("session {} started", self.id);
    }

    fn pause(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.state = SessionState::Paused;
        self.broadcast(&ServerMessage::Paused);
        debug!("session {} paused", self.id);
    }

    fn stop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.state = SessionState::Stopped;
        self.broadcast(&ServerMessage::Stopped);
        info!("session {} stopped", self.id);
    }

    fn finish(&mut self, winner: PlayerSide) {
        self.state = SessionState::Finished;
        self.broadcast(&ServerMessage::Finished(winner));
        info!("session {} finished, winner {:?}", self.id, winner);
    }

    /// A participant dropped: force a stop from any non-terminal state and,
    /// for online sessions, tell the survivor why
    fn handle_disconnect(&mut self, conn: ConnectionId) {
        if self.is_terminal() {
            return;
        }
        self.state = SessionState::Stopped;
        self.broadcast(&ServerMessage::Stopped);
        if let SessionKind::Online { p1, p2, .. } = &self.kind {
            let survivor = if conn == p1.conn { &p2.outbound } else { &p1.outbound };
            send_frame(survivor, &ServerMessage::GameOver("opponent-disconnected".to_string()));
        }
        info!("session {} stopped, connection {} disconnected", self.id, conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{PaddleInput, UserProfile};
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_tungstenite::tungstenite::Message;

    fn channel() -> (Outbound, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    fn drain_frames(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(Message::Text(text)) => {
                    frames.push(serde_json::from_str(&text).unwrap());
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        frames
    }

    fn local_session(
        settings: GameSettings,
    ) -> (GameSession, mpsc::UnboundedReceiver<Message>, mpsc::UnboundedReceiver<SessionEnded>) {
        let (out_tx, out_rx) = channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let session = GameSession::local(1, out_tx, settings, 60, ended_tx);
        (session, out_rx, ended_rx)
    }

    fn online_session() -> (
        GameSession,
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedReceiver<SessionEnded>,
    ) {
        let (tx1, rx1) = channel();
        let (tx2, rx2) = channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let profiles = MatchPlayers {
            player1: UserProfile {
                name: "alice".to_string(),
                avatar_url: String::new(),
                is_guest: Some(true),
            },
            player2: UserProfile {
                name: "bob".to_string(),
                avatar_url: String::new(),
                is_guest: Some(true),
            },
        };
        let session = GameSession::online(
            Participant { conn: 1, outbound: tx1 },
            Participant { conn: 2, outbound: tx2 },
            profiles,
            60,
            ended_tx,
        );
        (session, rx1, rx2, ended_rx)
    }

    #[tokio::test]
    async fn test_local_start_pause_stop_transitions() {
        let (mut session, mut out_rx, _ended) = local_session(GameSettings::default());
        assert_eq!(session.state(), SessionState::Created);

        session.handle_frame(1, ClientMessage::Local1v1Start);
        assert_eq!(session.state(), SessionState::Running);

        // A second start while running is ignored
        session.handle_frame(1, ClientMessage::Local1v1Start);
        assert_eq!(session.state(), SessionState::Running);

        session.handle_frame(1, ClientMessage::Local1v1Pause);
        assert_eq!(session.state(), SessionState::Paused);

        // Stop is only valid while running
        session.handle_frame(1, ClientMessage::Local1v1Stop);
        assert_eq!(session.state(), SessionState::Paused);

        session.handle_frame(1, ClientMessage::Local1v1Start);
        session.handle_frame(1, ClientMessage::Local1v1Stop);
        assert_eq!(session.state(), SessionState::Stopped);

        let frames = drain_frames(&mut out_rx);
        let kinds: Vec<_> = frames
            .iter()
            .map(|f| match f {
                ServerMessage::Started(_) => "started",
                ServerMessage::Paused => "paused",
                ServerMessage::Stopped => "stopped",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["started", "paused", "started", "stopped"]);
    }

    #[tokio::test]
    async fn test_tick_drains_inputs_and_broadcasts() {
        let (mut session, mut out_rx, _ended) = local_session(GameSettings::default());
        session.handle_frame(1, ClientMessage::Local1v1Start);
        drain_frames(&mut out_rx);

        let up = PaddleInput { dt: 0.1, up: true, down: false };
        let idle = PaddleInput { dt: 0.1, up: false, down: false };
        session.handle_frame(1, ClientMessage::Local1v1Input { p1: up, p2: idle });
        assert_eq!(session.input_queue.len(), 2);

        session.tick();
        assert!(session.input_queue.is_empty());

        let frames = drain_frames(&mut out_rx);
        match frames.as_slice() {
            [ServerMessage::State(state)] => {
                assert!(state.p1.y < 300.0);
                assert_eq!(state.p2.y, 300.0);
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tick_finishes_on_winner() {
        let mut settings = GameSettings::default();
        settings.score_needed = 1;
        let (mut session, mut out_rx, _ended) = local_session(settings);
        session.handle_frame(1, ClientMessage::Local1v1Start);
        drain_frames(&mut out_rx);

        // Force the ball past p1's baseline
        session.physics.state_mut().ball.x = -20.0;
        session.tick();

        assert_eq!(session.state(), SessionState::Finished);
        let frames = drain_frames(&mut out_rx);
        match frames.as_slice() {
            [ServerMessage::State(state), ServerMessage::Finished(winner)] => {
                assert_eq!(state.p2.score, 1);
                assert_eq!(*winner, PlayerSide::P2);
            }
            other => panic!("unexpected frames: {other:?}"),
        }
        assert_eq!(
            session.outcome(),
            SessionOutcome::Finished {
                winner: PlayerSide::P2,
                score: "0-1".to_string(),
                play_time_secs: 0.0,
            }
        );
    }

    #[tokio::test]
    async fn test_online_ready_handshake_gates_start() {
        let (mut session, mut rx1, mut rx2, _ended) = online_session();

        session.handle_frame(1, ClientMessage::OnlinePlayerReady);
        assert_eq!(session.state(), SessionState::Created);
        let frames = drain_frames(&mut rx1);
        assert!(matches!(frames.as_slice(), [ServerMessage::ReadyAck]));

        session.handle_frame(2, ClientMessage::OnlinePlayerReady);
        assert_eq!(session.state(), SessionState::Running);

        let frames = drain_frames(&mut rx2);
        match frames.as_slice() {
            [ServerMessage::ReadyAck, ServerMessage::Started(Some(payload))] => {
                assert_eq!(payload.players.player1.name, "alice");
                assert_eq!(payload.players.player2.name, "bob");
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_online_inputs_map_to_sides() {
        let (mut session, _rx1, _rx2, _ended) = online_session();
        session.handle_frame(1, ClientMessage::OnlinePlayerReady);
        session.handle_frame(2, ClientMessage::OnlinePlayerReady);

        let input = PaddleInput { dt: 0.1, up: true, down: false };
        session.handle_frame(2, ClientMessage::OnlineInput { input: input.clone() });
        session.handle_frame(1, ClientMessage::OnlineInput { input });

        let sides: Vec<_> = session.input_queue.iter().map(|(side, _)| *side).collect();
        assert_eq!(sides, vec![PlayerSide::P2, PlayerSide::P1]);
    }

    #[tokio::test]
    async fn test_unexpected_frame_yields_error() {
        let (mut session, mut out_rx, _ended) = local_session(GameSettings::default());
        session.handle_frame(1, ClientMessage::OnlinePlayerReady);
        let frames = drain_frames(&mut out_rx);
        assert!(matches!(frames.as_slice(), [ServerMessage::Error { .. }]));
        assert_eq!(session.state(), SessionState::Created);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_online_survivor() {
        let (mut session, _rx1, mut rx2, _ended) = online_session();
        session.handle_frame(1, ClientMessage::OnlinePlayerReady);
        session.handle_frame(2, ClientMessage::OnlinePlayerReady);
        drain_frames(&mut rx2);

        session.handle_command(SessionCommand::Disconnected { conn: 1 });
        assert_eq!(session.state(), SessionState::Stopped);

        let frames = drain_frames(&mut rx2);
        match frames.as_slice() {
            [ServerMessage::Stopped, ServerMessage::GameOver(reason)] => {
                assert_eq!(reason, "opponent-disconnected");
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_input_queue_is_bounded() {
        let (mut session, _out, _ended) = local_session(GameSettings::default());
        let input = PaddleInput { dt: 0.01, up: true, down: false };
        for _ in 0..600 {
            session.handle_frame(
                1,
                ClientMessage::Local1v1Input { p1: input.clone(), p2: input.clone() },
            );
        }
        assert!(session.input_queue.len() <= INPUT_QUEUE_LIMIT);
    }

    #[tokio::test]
    async fn test_run_reports_session_ended() {
        let (session, _out, mut ended_rx) = local_session(GameSettings::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let id = session.id();
        let handle = tokio::spawn(session.run(cmd_rx));

        cmd_tx.send(SessionCommand::Frame { conn: 1, msg: ClientMessage::Local1v1Start }).unwrap();
        cmd_tx.send(SessionCommand::Frame { conn: 1, msg: ClientMessage::Local1v1Stop }).unwrap();

        let ended = ended_rx.recv().await.unwrap();
        assert_eq!(ended.id, id);
        assert_eq!(ended.participants, vec![1]);
        assert_eq!(ended.outcome, SessionOutcome::Stopped);
        handle.await.unwrap();
    }
}
