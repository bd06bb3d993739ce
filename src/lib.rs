//! Authoritative game server for two-paddle ball games.
//!
//! Clients connect over WebSocket and speak a JSON protocol of tagged
//! frames. The server runs all physics at a fixed tick rate and broadcasts
//! authoritative state, clients only ever send inputs and lifecycle commands.
//! Local sessions put both paddles on one connection, online sessions are
//! formed from a FIFO matchmaking queue and report their results to an
//! external store.

pub mod config;
pub mod game;
pub mod matchmaking;
pub mod net;
