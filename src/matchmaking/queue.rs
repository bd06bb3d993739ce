//! FIFO matchmaking queue for online 1v1.

use crate::net::connection::ConnectionId;
use crate::net::protocol::UserProfile;

/// One waiting player
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub conn: ConnectionId,
    pub user: UserProfile,
}

/// Waiting players in join order. Pairing is strict FIFO, no skill or latency
/// criteria.
#[derive(Debug, Default)]
pub struct MatchQueue {
    waiting: Vec<QueuedEntry>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a player. Returns false when the connection is already
    /// waiting, a repeat join neither reorders nor duplicates the entry.
    pub fn add_player(&mut self, conn: ConnectionId, user: UserProfile) -> bool {
        if self.waiting.iter().any(|entry| entry.conn == conn) {
            return false;
        }
        self.waiting.push(QueuedEntry { conn, user });
        true
    }

    /// Remove a waiting player, e.g. on disconnect. Later entries keep their
    /// relative order.
    pub fn remove_player(&mut self, conn: ConnectionId) {
        self.waiting.retain(|entry| entry.conn != conn);
    }

    /// Pop the two longest-waiting players when a pair is available
    pub fn take_pair(&mut self) -> Option<(QueuedEntry, QueuedEntry)> {
        if self.waiting.len() < 2 {
            return None;
        }
        let first = self.waiting.remove(0);
        let second = self.waiting.remove(0);
        Some((first, second))
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
