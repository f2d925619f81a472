//! Parity streak prediction bot.
//!
//! Reads finalized game results from a Telegram feed channel, tracks even/odd runs
//! against per-parity gap thresholds, broadcasts "the run will break" predictions
//! and verifies each one over the following three games.

pub mod classifier;
pub mod commands;
pub mod config;
pub mod destinations;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gap;
pub mod health;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod prediction;
pub mod retry;
pub mod streak;
pub mod supervisor;
pub mod telegram;
pub mod transport;
pub mod types;
