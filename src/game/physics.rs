//! Deterministic paddle/ball physics.
//!
//! Pure state-update functions, no timers. The owning session calls
//! [`Physics::apply_input`] for each queued input frame and
//! [`Physics::update_physics`] once per tick. The only nondeterminism is the
//! vertical direction sign when the ball is (re)served, which is an explicit
//! design choice, not a hidden source of divergence.

use serde::{Deserialize, Serialize};

use crate::game::settings::GameSettings;
use crate::net::protocol::PaddleInput;

/// Which paddle a state or input belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSide {
    P1,
    P2,
}

impl PlayerSide {
    pub fn opponent(self) -> Self {
        match self {
            PlayerSide::P1 => PlayerSide::P2,
            PlayerSide::P2 => PlayerSide::P1,
        }
    }
}

/// Ball position, unit direction and scalar speed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    pub speed: f64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

/// Paddle center and score for one side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleState {
    pub y: f64,
    pub score: u32,
}

/// Full physics state, broadcast verbatim every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicsState {
    /// Shared paddle speed, grows with the rally and resets on score
    pub paddle_speed: f64,
    pub ball: BallState,
    pub p1: PaddleState,
    pub p2: PaddleState,
}

impl PhysicsState {
    pub fn paddle(&self, side: PlayerSide) -> &PaddleState {
        match side {
            PlayerSide::P1 => &self.p1,
            PlayerSide::P2 => &self.p2,
        }
    }

    fn paddle_mut(&mut self, side: PlayerSide) -> &mut PaddleState {
        match side {
            PlayerSide::P1 => &mut self.p1,
            PlayerSide::P2 => &mut self.p2,
        }
    }
}

/// Physics engine for one session
pub struct Physics {
    settings: GameSettings,
    state: PhysicsState,
    winner: Option<PlayerSide>,
}

impl Physics {
    pub fn new(settings: GameSettings) -> Self {
        let state = PhysicsState {
            paddle_speed: settings.paddle_speed,
            ball: Self::serve_ball(&settings, PlayerSide::P2),
            p1: PaddleState { y: settings.height / 2.0, score: 0 },
            p2: PaddleState { y: settings.height / 2.0, score: 0 },
        };
        Self { settings, state, winner: None }
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn state(&self) -> &PhysicsState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut PhysicsState {
        &mut self.state
    }

    pub fn winner(&self) -> Option<PlayerSide> {
        self.winner
    }

    /// Apply a single input frame, moving one paddle.
    ///
    /// Moves by `paddle_speed * dt` in the requested direction, then clamps
    /// the paddle center into the field. Inert once a winner is set.
    pub fn apply_input(&mut self, side: PlayerSide, input: &PaddleInput) {
        if self.winner.is_some() {
            return;
        }
        let step = self.state.paddle_speed * input.dt;
        let half = self.settings.paddle_height / 2.0;
        let top = half;
        let bottom = self.settings.height - half;
        let paddle = self.state.paddle_mut(side);
        if input.up {
            paddle.y -= step;
        }
        if input.down {
            paddle.y += step;
        }
        paddle.y = paddle.y.clamp(top, bottom);
    }

    /// Advance the ball by one timestep and resolve collisions and scoring.
    ///
    /// Paddles only move through `apply_input`. Inert once a winner is set.
    pub fn update_physics(&mut self, dt: f64) {
        if self.winner.is_some() {
            return;
        }

        let s = &self.settings;
        let ball = &mut self.state.ball;
        ball.x += ball.vx * ball.speed * dt;
        ball.y += ball.vy * ball.speed * dt;

        // Bounce off top/bottom walls
        if ball.y <= s.ball_radius {
            ball.vy = ball.vy.abs();
        } else if ball.y >= s.height - s.ball_radius {
            ball.vy = -ball.vy.abs();
        }

        // Paddle-ball collision, the paddle seen as a single vertical line
        let paddle_half = (s.paddle_height + s.ball_radius) / 2.0;
        for side in [PlayerSide::P1, PlayerSide::P2] {
            let paddle_x = match side {
                PlayerSide::P1 => s.paddle_offset,
                PlayerSide::P2 => s.width - s.paddle_offset,
            };
            let paddle_y = self.state.paddle(side).y;
            let ball = &mut self.state.ball;
            if (ball.x - paddle_x).abs() < s.ball_radius
                && (ball.y - paddle_y).abs() < paddle_half
            {
                let dir = match side {
                    PlayerSide::P1 => 1.0,
                    PlayerSide::P2 => -1.0,
                };
                if s.ball_control {
                    // Hit offset in [-1, 1] steers the outgoing angle up to 60°
                    let hit_offset = (ball.y - paddle_y) / paddle_half;
                    let angle = hit_offset * std::f64::consts::FRAC_PI_3;
                    ball.vx = angle.cos() * dir;
                    ball.vy = angle.sin();
                } else {
                    ball.vx = ball.vx.abs() * dir;
                }

                ball.speed = (ball.speed + s.ball_speedup).min(s.ball_speed_max);
                self.state.paddle_speed =
                    (self.state.paddle_speed + s.paddle_speedup).min(s.paddle_speed_max);
            }
        }

        // Scoring: ball past a paddle's baseline
        if self.state.ball.x <= 0.0 {
            self.award_point(PlayerSide::P2);
        } else if self.state.ball.x >= s.width {
            self.award_point(PlayerSide::P1);
        }
    }

    /// Fresh ball in the center, heading at 45° toward `toward` with a random
    /// vertical sign.
    fn serve_ball(settings: &GameSettings, toward: PlayerSide) -> BallState {
        let diag = std::f64::consts::FRAC_PI_4;
        let vx = match toward {
            PlayerSide::P1 => -diag.cos(),
            PlayerSide::P2 => diag.cos(),
        };
        let vy = if rand::random::<bool>() { diag.sin() } else { -diag.sin() };
        BallState {
            speed: settings.ball_initial_speed,
            x: settings.width / 2.0,
            y: settings.height / 2.0,
            vx,
            vy,
        }
    }

    /// Score a point, reset ball and paddle speed, crown a winner when the
    /// needed score is reached. The next serve heads toward the side that was
    /// just scored against.
    fn award_point(&mut self, side: PlayerSide) {
        let paddle = self.state.paddle_mut(side);
        paddle.score += 1;
        let score = paddle.score;
        self.state.ball = Self::serve_ball(&self.settings, side.opponent());
        self.state.paddle_speed = self.settings.paddle_speed;
        if score == self.settings.score_needed {
            self.winner = Some(side);
        }
    }
}
