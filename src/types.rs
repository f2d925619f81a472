//! Core value types shared by the engine, the executor and the command surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseValueError;

/// Broadcast destination (a Telegram chat id).
pub type DestinationId = i64;

/// Number of consecutive games, starting at the target, during which an open
/// prediction can still win.
pub const PREDICTION_WINDOW: usize = 3;

/// Distance between the last finalized game and the game a new prediction targets.
pub const TARGET_OFFSET: u64 = 1;

// =============================================================================
// PARITY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn of(total: u32) -> Self {
        if total % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Parity::Even => "🔵",
            Parity::Odd => "🔴",
        }
    }
}

/// Accepts English and the feed's French spellings.
impl FromStr for Parity {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "even" | "pair" | "e" => Ok(Parity::Even),
            "odd" | "impair" | "o" => Ok(Parity::Odd),
            _ => Err(ParseValueError {
                kind: "parity",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Even => write!(f, "EVEN"),
            Parity::Odd => write!(f, "ODD"),
        }
    }
}

// =============================================================================
// OBSERVATIONS
// =============================================================================

/// A finalized game result. Identity is `game_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameObservation {
    pub game_number: u64,
    pub total: u32,
    pub parity: Parity,
    pub observed_at: DateTime<Utc>,
}

impl GameObservation {
    pub fn new(game_number: u64, total: u32, observed_at: DateTime<Utc>) -> Self {
        Self {
            game_number,
            total,
            parity: Parity::of(total),
            observed_at,
        }
    }

    pub fn is_even(&self) -> bool {
        self.parity == Parity::Even
    }
}

/// A game whose feed message is still in progress.
#[derive(Debug, Clone)]
pub struct PendingGame {
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
}

// =============================================================================
// THRESHOLDS & STREAKS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapMode {
    Auto,
    Manual,
}

impl FromStr for GapMode {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(GapMode::Auto),
            "manual" | "manuel" => Ok(GapMode::Manual),
            _ => Err(ParseValueError {
                kind: "gap mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for GapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapMode::Auto => write!(f, "auto"),
            GapMode::Manual => write!(f, "manual"),
        }
    }
}

/// A per-parity threshold pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParityPair {
    pub even: u32,
    pub odd: u32,
}

impl ParityPair {
    pub fn get(&self, parity: Parity) -> u32 {
        match parity {
            Parity::Even => self.even,
            Parity::Odd => self.odd,
        }
    }

    pub fn set(&mut self, parity: Parity, value: u32) {
        match parity {
            Parity::Even => self.even = value,
            Parity::Odd => self.odd = value,
        }
    }
}

/// Current same-parity run. At most one side is nonzero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreakState {
    pub even_run: u32,
    pub odd_run: u32,
}

impl StreakState {
    pub fn run(&self, parity: Parity) -> u32 {
        match parity {
            Parity::Even => self.even_run,
            Parity::Odd => self.odd_run,
        }
    }

    /// Parity and length of the active run, if any.
    pub fn current(&self) -> Option<(Parity, u32)> {
        if self.even_run > 0 {
            Some((Parity::Even, self.even_run))
        } else if self.odd_run > 0 {
            Some((Parity::Odd, self.odd_run))
        } else {
            None
        }
    }
}

// =============================================================================
// PREDICTIONS
// =============================================================================

/// Opaque id of a sent broadcast message, used to edit it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle(pub i64);

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionStatus {
    Open,
    /// Won on the game at `offset` from the target (0, 1 or 2).
    Won { offset: u64 },
    Lost,
    /// Discarded by a reset before it could resolve.
    Expired,
}

impl PredictionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, PredictionStatus::Open)
    }

    /// Status line shown in the broadcast message.
    pub fn label(&self) -> String {
        match self {
            PredictionStatus::Open => {
                format!("🔮 Pending (checked over {} games)", PREDICTION_WINDOW)
            }
            PredictionStatus::Won { offset } => {
                let marker = match offset {
                    0 => "0️⃣".to_string(),
                    1 => "1️⃣".to_string(),
                    2 => "2️⃣".to_string(),
                    n => format!("+{}", n),
                };
                format!("✅{} WON", marker)
            }
            PredictionStatus::Lost => "❌ LOST".to_string(),
            PredictionStatus::Expired => "⌛ EXPIRED".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub target_game: u64,
    pub predicted: Parity,
    pub status: PredictionStatus,
    pub opened_at: DateTime<Utc>,
    pub checked_games: BTreeSet<u64>,
    pub broadcast_refs: BTreeMap<DestinationId, MessageHandle>,
}

impl Prediction {
    pub fn new(target_game: u64, predicted: Parity, opened_at: DateTime<Utc>) -> Self {
        Self {
            target_game,
            predicted,
            status: PredictionStatus::Open,
            opened_at,
            checked_games: BTreeSet::new(),
            broadcast_refs: BTreeMap::new(),
        }
    }

    /// Text of the broadcast message for the current status.
    pub fn render(&self) -> String {
        format!(
            "🎯 Prediction Game #{}: {} {}\n📊 Status: {}",
            self.target_game,
            self.predicted.emoji(),
            self.predicted,
            self.status.label()
        )
    }
}

/// Cumulative counters, cleared on every reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub predictions_made: u64,
    pub predictions_won: u64,
    pub predictions_lost: u64,
    pub even_count: u64,
    pub odd_count: u64,
}

impl Counters {
    pub fn win_rate_percent(&self) -> f64 {
        if self.predictions_made == 0 {
            return 0.0;
        }
        self.predictions_won as f64 / self.predictions_made as f64 * 100.0
    }
}

/// Why a reset happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    DailySchedule,
    PredictionTimeout,
    Admin,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::DailySchedule => write!(f, "daily schedule"),
            ResetReason::PredictionTimeout => write!(f, "prediction timeout"),
            ResetReason::Admin => write!(f, "admin request"),
        }
    }
}
