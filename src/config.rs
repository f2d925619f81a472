//! System configuration.
//!
//! Every knob is read from the environment (after `.env` is loaded) with a constant
//! default. Invalid values are logged and replaced by the default; only the Telegram
//! credentials are mandatory.

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use std::str::FromStr;
use tracing::warn;

use crate::types::{DestinationId, GapMode};

/// Telegram Bot API base URL
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates (seconds)
pub const POLL_TIMEOUT_SECS: u64 = 30;

/// Delay before restarting the update loop after it gives up (seconds)
pub const POLL_RESTART_DELAY_SECS: u64 = 5;

/// Default number of games kept in the history window
const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Default minutes an open prediction may stay unresolved before a reset
const DEFAULT_PREDICTION_TIMEOUT_MINUTES: i64 = 20;

/// Default seconds between stuck-prediction checks
const DEFAULT_TIMEOUT_POLL_SECS: u64 = 60;

/// Default local wall-clock time of the daily reset
const DEFAULT_DAILY_RESET_TIME: &str = "00:59";

/// Default UTC offset of the reset clock (West Africa Time)
const DEFAULT_RESET_UTC_OFFSET_HOURS: i32 = 1;

/// Default consecutive transport failures before health reports degraded
const DEFAULT_TRANSPORT_DEGRADED_AFTER: u64 = 5;

/// Default health server port
const DEFAULT_PORT: u16 = 10000;

/// Default path of the persisted destination list
const DEFAULT_DESTINATIONS_FILE: &str = "destinations.json";

/// Default number of games shown by the history command
pub const DEFAULT_HISTORY_DISPLAY: usize = 20;

/// Read `name` and parse it, falling back to `default` (with a warning) when the
/// value is unparsable or rejected by `valid`.
fn env_or<T>(name: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(v) if valid(&v) => v,
            Ok(v) => {
                warn!("Invalid {}={} (out of range), using default {}", name, v, default);
                default
            }
            Err(_) => {
                warn!("Failed to parse {}='{}', using default {}", name, raw, default);
                default
            }
        },
        _ => default,
    }
}

/// Normalize a Telegram channel id: positive ids of 10+ digits are channel ids
/// written without their minus sign.
pub fn normalize_channel_id(id: i64) -> i64 {
    if id > 0 && id.to_string().len() >= 10 {
        -id
    } else {
        id
    }
}

pub fn parse_channel_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().map(normalize_channel_id)
}

/// Comma-separated destination list, e.g. `PREDICTION_CHANNEL_IDS="-1001,-1002"`.
pub fn destinations_from_env() -> Vec<DestinationId> {
    std::env::var("PREDICTION_CHANNEL_IDS")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.split(',')
                .filter_map(|part| {
                    let parsed = parse_channel_id(part);
                    if parsed.is_none() {
                        warn!("Ignoring invalid destination id '{}'", part.trim());
                    }
                    parsed
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn history_capacity() -> usize {
    env_or("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY, |&n| n >= 2)
}

pub fn prediction_timeout_minutes() -> i64 {
    env_or(
        "PREDICTION_TIMEOUT_MINUTES",
        DEFAULT_PREDICTION_TIMEOUT_MINUTES,
        |&n| n > 0,
    )
}

pub fn timeout_poll_secs() -> u64 {
    env_or("TIMEOUT_POLL_SECS", DEFAULT_TIMEOUT_POLL_SECS, |&n| n > 0)
}

pub fn transport_degraded_after() -> u64 {
    env_or(
        "TRANSPORT_DEGRADED_AFTER",
        DEFAULT_TRANSPORT_DEGRADED_AFTER,
        |&n| n > 0,
    )
}

pub fn health_port() -> u16 {
    env_or("PORT", DEFAULT_PORT, |&p| p > 0)
}

pub fn destinations_file() -> String {
    std::env::var("DESTINATIONS_FILE").unwrap_or_else(|_| DEFAULT_DESTINATIONS_FILE.to_string())
}

pub fn initial_gap_mode() -> GapMode {
    match std::env::var("GAP_MODE") {
        Ok(raw) => raw.parse::<GapMode>().unwrap_or_else(|_| {
            warn!("Invalid GAP_MODE='{}' (must be 'auto' or 'manual'), using auto", raw);
            GapMode::Auto
        }),
        Err(_) => GapMode::Auto,
    }
}

/// Wall-clock time and zone of the daily reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyResetSchedule {
    pub time: NaiveTime,
    pub offset: FixedOffset,
}

impl Default for DailyResetSchedule {
    fn default() -> Self {
        Self {
            time: NaiveTime::from_hms_opt(0, 59, 0).unwrap_or_default(),
            offset: FixedOffset::east_opt(DEFAULT_RESET_UTC_OFFSET_HOURS * 3600)
                .unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl DailyResetSchedule {
    pub fn from_env() -> Self {
        let fallback = Self::default();
        let time = match std::env::var("DAILY_RESET_TIME") {
            Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").unwrap_or_else(|_| {
                warn!(
                    "Failed to parse DAILY_RESET_TIME='{}' (expected HH:MM), using {}",
                    raw, DEFAULT_DAILY_RESET_TIME
                );
                fallback.time
            }),
            Err(_) => fallback.time,
        };
        let hours = env_or(
            "RESET_UTC_OFFSET_HOURS",
            DEFAULT_RESET_UTC_OFFSET_HOURS,
            |&h| (-12..=14).contains(&h),
        );
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or(fallback.offset);
        Self { time, offset }
    }
}

/// Telegram credentials and identities.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub source_channel_id: i64,
    /// Operator user id; 0 disables the admin check and admin notifications.
    pub admin_id: i64,
    pub api_base: String,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self> {
        let bot_token = std::env::var("BOT_TOKEN").context("BOT_TOKEN not set")?;
        if bot_token.trim().is_empty() {
            anyhow::bail!("BOT_TOKEN is empty");
        }
        let source_raw = std::env::var("SOURCE_CHANNEL_ID").context("SOURCE_CHANNEL_ID not set")?;
        let source_channel_id = parse_channel_id(&source_raw)
            .with_context(|| format!("SOURCE_CHANNEL_ID='{}' is not an integer", source_raw))?;
        let admin_id = std::env::var("ADMIN_ID")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let api_base =
            std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| TELEGRAM_API_BASE.to_string());

        Ok(Self {
            bot_token,
            source_channel_id,
            admin_id,
            api_base,
        })
    }

    pub fn admin_enabled(&self) -> bool {
        self.admin_id != 0
    }
}
