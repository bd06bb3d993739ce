//! Reporting finished online matches to the external result store.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Record of one finished online match. The store keys players by display
/// name only, the full profiles stay server-side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Match id, same one announced in the `game-ready` frame
    pub id: Uuid,
    /// Play time in seconds, measured from the moment both players were ready
    pub time: f64,
    pub player1: String,
    pub player2: String,
    pub player1_won: bool,
    /// Final score as "p1-p2"
    pub score: String,
}

/// Envelope the store expects around a result
#[derive(Debug, Serialize)]
struct ResultEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: &'a MatchResult,
}

#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("result store request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// HTTP client for the result store. Cheap to clone, submissions are
/// fire-and-forget from the manager's point of view, failures are logged and
/// never affect a session.
#[derive(Clone)]
pub struct ResultStore {
    client: reqwest::Client,
    url: String,
}

impl ResultStore {
    pub fn new(url: String) -> Self {
        Self { client: reqwest::Client::new(), url }
    }

    /// POST one finished match to the store
    pub async fn submit(&self, result: &MatchResult) -> Result<(), ResultStoreError> {
        let envelope = ResultEnvelope { kind: "game-result", payload: result };
        self.client
            .post(&self.url)
            .json(&envelope)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let result = MatchResult {
            id: Uuid::new_v4(),
            time: 42.5,
            player1: "alice".to_string(),
            player2: "bob".to_string(),
            player1_won: true,
            score: "5-3".to_string(),
        };
        let envelope = ResultEnvelope { kind: "game-result", payload: &result };
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "game-result");
        assert_eq!(value["payload"]["player1Won"], true);
        assert_eq!(value["payload"]["score"], "5-3");
        // Players are plain name strings, not profile objects
        assert_eq!(value["payload"]["player1"], "alice");
        assert_eq!(value["payload"]["player2"], "bob");
        assert_eq!(value["payload"]["time"], 42.5);
    }
}
