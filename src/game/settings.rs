use serde::{Deserialize, Serialize};

/// Settings a game session is created with.
///
/// Local sessions receive these from the initiating client, online sessions
/// use the server defaults. Immutable for the lifetime of a session. No
/// attempt is made to check that the dimensions make sense to play on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    /// Width of the playing field
    pub width: f64,
    /// Height of the playing field
    pub height: f64,
    /// Offset along the width where the paddle-ball hit is checked
    pub paddle_offset: f64,
    /// Height of a paddle
    pub paddle_height: f64,
    /// Paddle speed on start/reset
    pub paddle_speed: f64,
    /// Paddle speed gain after each paddle-ball contact
    pub paddle_speedup: f64,
    /// Paddle speed cap
    pub paddle_speed_max: f64,
    /// Radius of the ball
    pub ball_radius: f64,
    /// Let the hit position on the paddle steer the outgoing ball angle
    pub ball_control: bool,
    /// Ball speed on start/reset
    pub ball_initial_speed: f64,
    /// Ball speed gain after each paddle-ball contact
    pub ball_speedup: f64,
    /// Ball speed cap
    pub ball_speed_max: f64,
    /// Score needed for a winner to be crowned
    pub score_needed: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            paddle_offset: 12.0,
            paddle_height: 120.0,
            paddle_speed: 360.0,
            paddle_speedup: 20.0,
            paddle_speed_max: 600.0,
            ball_radius: 10.0,
            ball_control: true,
            ball_initial_speed: 160.0,
            ball_speedup: 30.0,
            ball_speed_max: 800.0,
            score_needed: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = GameSettings::default();
        assert_eq!(settings.width, 800.0);
        assert_eq!(settings.height, 600.0);
        assert_eq!(settings.score_needed, 5);
        assert!(settings.ball_control);
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(GameSettings::default()).unwrap();
        assert!(json.get("paddleOffset").is_some());
        assert!(json.get("paddleSpeedMax").is_some());
        assert!(json.get("ballControl").is_some());
        assert!(json.get("scoreNeeded").is_some());
    }

    #[test]
    fn test_roundtrip_through_client_payload() {
        let settings = GameSettings {
            score_needed: 11,
            ball_control: false,
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: GameSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
