//! Wire protocol: JSON text frames tagged by a `type` field.
//!
//! Every inbound frame is validated into a [`ClientMessage`] or rejected with
//! a [`ProtocolError`], which the transport answers with an `error` frame.
//! Wire names and payload shapes follow the browser client contract exactly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::physics::{PhysicsState, PlayerSide};
use crate::game::settings::GameSettings;

/// One player's input frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleInput {
    /// Time between inputs, client and server tick rates can differ
    pub dt: f64,
    pub up: bool,
    pub down: bool,
}

/// Public profile attached to a queue join.
///
/// The user identifier is opaque and externally verified, the core does no
/// token checking of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: String,
    #[serde(rename = "isGuest", default, skip_serializing_if = "Option::is_none")]
    pub is_guest: Option<bool>,
}

/// Both participants of an online match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPlayers {
    pub player1: UserProfile,
    pub player2: UserProfile,
}

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Ask the manager to set up a game on one connection (shared keyboard)
    #[serde(rename = "local1v1")]
    Local1v1 { settings: GameSettings },
    /// Join the online matchmaking queue
    #[serde(rename = "queue-join")]
    QueueJoin { user: UserProfile },
    /// Keep-alive, answered with a transport-level pong
    #[serde(rename = "ping")]
    Ping,
    /// Start a local session's clock
    #[serde(rename = "local1v1-start")]
    Local1v1Start,
    /// Stop a local session
    #[serde(rename = "local1v1-stop")]
    Local1v1Stop,
    /// Pause a local session
    #[serde(rename = "local1v1-pause")]
    Local1v1Pause,
    /// One combined input frame for both paddles of a local session
    #[serde(rename = "local1v1-input")]
    Local1v1Input { p1: PaddleInput, p2: PaddleInput },
    /// Ready signal for the online pre-start handshake
    #[serde(rename = "online-player-ready")]
    OnlinePlayerReady,
    /// Single-paddle input for an online session
    #[serde(rename = "online-input")]
    OnlineInput { input: PaddleInput },
}

/// Payload of a `started` frame, present for online sessions only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedPayload {
    pub players: MatchPlayers,
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Physics snapshot, sent every tick while running
    #[serde(rename = "state")]
    State(PhysicsState),
    #[serde(rename = "started")]
    Started(Option<StartedPayload>),
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "paused")]
    Paused,
    /// Terminal frame carrying the winning side
    #[serde(rename = "finished")]
    Finished(PlayerSide),
    /// A session was created for this connection
    #[serde(rename = "game-ready")]
    GameReady {
        #[serde(rename = "matchId")]
        match_id: Uuid,
        settings: GameSettings,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        players: Option<MatchPlayers>,
    },
    /// The session ended for a reason other than play, e.g. the opponent
    /// left; the payload is the reason string itself
    #[serde(rename = "game-over")]
    GameOver(String),
    /// Echo acknowledging a received ready signal
    #[serde(rename = "online-player-ready")]
    ReadyAck,
    #[serde(rename = "error")]
    Error { message: String },
}

/// Codec errors, each answered with an `error` frame on the offending
/// connection while the connection itself stays open
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Malformed client message")]
    Malformed(#[source] serde_json::Error),
    #[error("Bad schema server-side")]
    NonFiniteState,
    #[error("Bad schema server-side")]
    Encode(#[source] serde_json::Error),
}

fn state_is_finite(state: &PhysicsState) -> bool {
    let b = &state.ball;
    [state.paddle_speed, b.speed, b.x, b.y, b.vx, b.vy, state.p1.y, state.p2.y]
        .iter()
        .all(|v| v.is_finite())
}

/// Validate an inbound text frame into a typed command
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    serde_json::from_value(value).map_err(ProtocolError::Malformed)
}

/// Serialize an outbound frame.
///
/// State snapshots are validated before serialization; serde_json would
/// otherwise write non-finite numbers as `null` and corrupt the frame. A
/// failure here replaces that tick's broadcast with an `error` frame.
/// Frames without a payload carry no `payload` key at all, so a local
/// `started` is `{"type":"started"}` rather than a null payload.
pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    if let ServerMessage::State(state) = message {
        if !state_is_finite(state) {
            return Err(ProtocolError::NonFiniteState);
        }
    }
    let mut value = serde_json::to_value(message).map_err(ProtocolError::Encode)?;
    if let Some(frame) = value.as_object_mut() {
        if frame.get("payload").is_some_and(serde_json::Value::is_null) {
            frame.remove("payload");
        }
    }
    serde_json::to_string(&value).map_err(ProtocolError::Encode)
}
