//! The prediction engine aggregate.
//!
//! `Engine` owns every piece of mutable prediction state and is driven by exactly one
//! task (see [`crate::executor`]). It never performs I/O: each operation returns the
//! [`Effect`]s the caller must deliver. Time is passed in, never read.

use crate::classifier::{self, Classification, IgnoreReason};
use crate::config;
use crate::error::EngineError;
use crate::gap::{game_number_gap_stats, GapEstimator, GapStats};
use crate::history::{HistoryStore, RecordOutcome};
use crate::prediction::{self, PredictionBook, Verification};
use crate::streak;
use crate::types::{
    Counters, DestinationId, GameObservation, GapMode, MessageHandle, Parity, ParityPair,
    PendingGame, Prediction, PredictionStatus, ResetReason, StreakState, TARGET_OFFSET,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Resolved predictions whose broadcast handles have not arrived yet.
const MAX_LATE_EDITS: usize = 16;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub history_capacity: usize,
    pub prediction_timeout: Duration,
    pub initial_mode: GapMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 20,
            prediction_timeout: Duration::minutes(20),
            initial_mode: GapMode::Auto,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            history_capacity: config::history_capacity(),
            prediction_timeout: Duration::minutes(config::prediction_timeout_minutes()),
            initial_mode: config::initial_gap_mode(),
        }
    }
}

/// Outbound work produced by an engine operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a new prediction to every destination; handles come back via
    /// [`Engine::record_handles`].
    Broadcast {
        target_game: u64,
        text: String,
        destinations: Vec<DestinationId>,
    },
    /// Rewrite previously sent prediction messages.
    EditBroadcast {
        target_game: u64,
        refs: Vec<(DestinationId, MessageHandle)>,
        text: String,
    },
    NotifyAdmin(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ignored(IgnoreReason),
    Pending {
        game_number: u64,
    },
    MissingTotal {
        game_number: u64,
    },
    DuplicateGame {
        game_number: u64,
    },
    /// Older than every game in a full window; it can no longer be recorded.
    Stale {
        game_number: u64,
    },
    Recorded {
        game_number: u64,
        parity: Parity,
        replaced: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    pub effects: Vec<Effect>,
}

impl IngestReport {
    fn quiet(outcome: IngestOutcome) -> Self {
        Self {
            outcome,
            effects: Vec::new(),
        }
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub last_game_number: Option<u64>,
    pub last_total: Option<u32>,
    pub counters: Counters,
    pub streak: StreakState,
    pub mode: GapMode,
    pub thresholds: ParityPair,
    pub open_prediction: Option<Prediction>,
    pub history_len: usize,
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoSnapshot {
    pub destinations: Vec<DestinationId>,
    pub last_game_number: Option<u64>,
    pub pending_finalization: usize,
    pub open_predictions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub games: Vec<GameObservation>,
    pub gap_stats: GapStats,
    pub mode: GapMode,
    pub thresholds: ParityPair,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub games_analyzed: usize,
    pub counters: Counters,
    pub gap_stats: GapStats,
    pub mode: GapMode,
    pub thresholds: ParityPair,
    pub auto_thresholds: ParityPair,
    pub manual_thresholds: ParityPair,
    pub win_rate_percent: f64,
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct Engine {
    config: EngineConfig,
    history: HistoryStore,
    pending: HashMap<u64, PendingGame>,
    gaps: GapEstimator,
    streak: StreakState,
    book: PredictionBook,
    even_count: u64,
    odd_count: u64,
    last_game_number: Option<u64>,
    last_total: Option<u32>,
    destinations: BTreeSet<DestinationId>,
    /// target_game -> final text, for predictions that resolved before their
    /// broadcast handles were reported. Survives resets.
    late_edits: BTreeMap<u64, String>,
}

impl Engine {
    pub fn new(config: EngineConfig, destinations: impl IntoIterator<Item = DestinationId>) -> Self {
        Self {
            history: HistoryStore::new(config.history_capacity),
            gaps: GapEstimator::new(config.initial_mode),
            pending: HashMap::new(),
            streak: StreakState::default(),
            book: PredictionBook::new(),
            even_count: 0,
            odd_count: 0,
            last_game_number: None,
            last_total: None,
            destinations: destinations.into_iter().collect(),
            late_edits: BTreeMap::new(),
            config,
        }
    }

    /// Process one feed message. `is_edit` is set for edited posts, which may
    /// overwrite an already recorded game.
    pub fn ingest(&mut self, text: &str, is_edit: bool, now: DateTime<Utc>) -> IngestReport {
        match classifier::classify(text) {
            Classification::Ignore(reason) => {
                debug!(?reason, "Ignoring feed message");
                IngestReport::quiet(IngestOutcome::Ignored(reason))
            }
            Classification::Pending { game_number } => {
                debug!(game = game_number, "⏳ Game in progress");
                self.pending.insert(
                    game_number,
                    PendingGame {
                        raw_text: text.to_string(),
                        received_at: now,
                    },
                );
                IngestReport::quiet(IngestOutcome::Pending { game_number })
            }
            Classification::FinalizedWithoutTotal { game_number } => {
                self.pending.remove(&game_number);
                warn!(
                    event = "missing_total",
                    game = game_number,
                    "⚠️ Finalized message without a total marker"
                );
                IngestReport::quiet(IngestOutcome::MissingTotal { game_number })
            }
            Classification::Finalized { game_number, total } => {
                self.pending.remove(&game_number);
                if !is_edit && self.history.contains(game_number) {
                    info!(
                        event = "duplicate_game",
                        game = game_number,
                        "Game already recorded, ignoring redelivery"
                    );
                    return IngestReport::quiet(IngestOutcome::DuplicateGame { game_number });
                }
                if self.history.is_behind_window(game_number) {
                    info!(
                        event = "stale_game",
                        game = game_number,
                        oldest = self.history.oldest().map(|o| o.game_number),
                        "Game is older than the history window, ignoring"
                    );
                    return IngestReport::quiet(IngestOutcome::Stale { game_number });
                }
                self.record_finalized(GameObservation::new(game_number, total, now), now)
            }
        }
    }

    fn record_finalized(&mut self, obs: GameObservation, now: DateTime<Utc>) -> IngestReport {
        let game_number = obs.game_number;
        let parity = obs.parity;

        let replaced = match self.history.record(obs.clone()) {
            RecordOutcome::Replaced { previous } => {
                self.uncount(previous.parity);
                if previous.parity != parity {
                    info!(
                        event = "game_edited",
                        game = game_number,
                        old_total = previous.total,
                        new_total = obs.total,
                        "✏️ Edited game changed parity"
                    );
                }
                true
            }
            RecordOutcome::Inserted { evicted } => {
                if let Some(evicted) = evicted {
                    debug!(game = evicted.game_number, "Evicted from history window");
                }
                false
            }
        };
        self.count(parity);

        if self.last_game_number.map_or(true, |last| game_number >= last) {
            self.last_game_number = Some(game_number);
            self.last_total = Some(obs.total);
        }
        self.prune_pending();

        let window = self.history.window(self.history.capacity());
        if self.gaps.refresh(&window, self.history.capacity()) {
            let t = self.gaps.auto_values();
            info!(event = "thresholds_updated", even = t.even, odd = t.odd, "📊 Auto thresholds updated");
        }
        self.streak = streak::compute(&self.history);

        info!(
            event = "game_recorded",
            game = game_number,
            total = obs.total,
            parity = %parity,
            even_run = self.streak.even_run,
            odd_run = self.streak.odd_run,
            "🎲 Game #{} → {} {}",
            game_number,
            obs.total,
            parity
        );

        let mut effects = Vec::new();
        if let Verification::Resolved(resolved) = self.book.verify(&obs) {
            self.resolution_effects(resolved, &mut effects);
        }
        self.maybe_open(now, &mut effects);

        IngestReport {
            outcome: IngestOutcome::Recorded {
                game_number,
                parity,
                replaced,
            },
            effects,
        }
    }

    fn count(&mut self, parity: Parity) {
        match parity {
            Parity::Even => self.even_count += 1,
            Parity::Odd => self.odd_count += 1,
        }
    }

    fn uncount(&mut self, parity: Parity) {
        match parity {
            Parity::Even => self.even_count = self.even_count.saturating_sub(1),
            Parity::Odd => self.odd_count = self.odd_count.saturating_sub(1),
        }
    }

    /// Pending entries older than the window can never influence a decision.
    fn prune_pending(&mut self) {
        if !self.history.is_full() {
            return;
        }
        if let Some(oldest) = self.history.oldest() {
            let floor = oldest.game_number;
            self.pending.retain(|game, _| *game >= floor);
        }
    }

    fn maybe_open(&mut self, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        if !self.history.is_full() || self.book.has_open() {
            return;
        }
        let thresholds = self.gaps.active();
        let Some(predicted) = prediction::trigger(&self.streak, &thresholds) else {
            return;
        };
        let Some(last) = self.last_game_number else {
            return;
        };
        let target_game = last + TARGET_OFFSET;

        let text = match self.book.open(target_game, predicted, now) {
            Ok(pred) => pred.render(),
            Err(_) => return,
        };
        info!(
            event = "prediction_opened",
            target_game,
            predicted = %predicted,
            even_run = self.streak.even_run,
            odd_run = self.streak.odd_run,
            threshold_even = thresholds.even,
            threshold_odd = thresholds.odd,
            "🎯 Prediction opened for game #{}: {}",
            target_game,
            predicted
        );

        if self.destinations.is_empty() {
            warn!(target_game, "No destinations configured, prediction not broadcast");
        } else {
            effects.push(Effect::Broadcast {
                target_game,
                text,
                destinations: self.destinations.iter().copied().collect(),
            });
        }
        effects.push(Effect::NotifyAdmin(format!(
            "🎯 New prediction: game #{} → {} {}\n📊 Streak: even {} / odd {} (thresholds {}/{})",
            target_game,
            predicted.emoji(),
            predicted,
            self.streak.even_run,
            self.streak.odd_run,
            thresholds.even,
            thresholds.odd
        )));
    }

    fn resolution_effects(&mut self, resolved: Prediction, effects: &mut Vec<Effect>) {
        let text = resolved.render();
        match resolved.status {
            PredictionStatus::Won { offset } => info!(
                event = "prediction_won",
                target_game = resolved.target_game,
                offset,
                "✅ Prediction for game #{} won at offset {}",
                resolved.target_game,
                offset
            ),
            PredictionStatus::Lost => info!(
                event = "prediction_lost",
                target_game = resolved.target_game,
                "❌ Prediction for game #{} lost",
                resolved.target_game
            ),
            _ => {}
        }
        self.push_edit(&resolved, text, effects);
        effects.push(Effect::NotifyAdmin(format!(
            "Prediction #{} resolved: {}",
            resolved.target_game,
            resolved.status.label()
        )));
    }

    /// Edit the delivered broadcasts, or park the text until handles arrive.
    fn push_edit(&mut self, pred: &Prediction, text: String, effects: &mut Vec<Effect>) {
        if pred.broadcast_refs.is_empty() {
            self.late_edits.insert(pred.target_game, text);
            while self.late_edits.len() > MAX_LATE_EDITS {
                self.late_edits.pop_first();
            }
        } else {
            effects.push(Effect::EditBroadcast {
                target_game: pred.target_game,
                refs: pred
                    .broadcast_refs
                    .iter()
                    .map(|(d, h)| (*d, *h))
                    .collect(),
                text,
            });
        }
    }

    /// Attach delivered handles to the prediction for `target_game`. If it already
    /// resolved, returns the edit that brings the late messages up to date.
    pub fn record_handles(
        &mut self,
        target_game: u64,
        handles: BTreeMap<DestinationId, MessageHandle>,
    ) -> Vec<Effect> {
        if handles.is_empty() {
            return Vec::new();
        }
        if self.book.record_handles(target_game, &handles) {
            debug!(target_game, count = handles.len(), "Broadcast handles recorded");
            return Vec::new();
        }
        match self.late_edits.remove(&target_game) {
            Some(text) => {
                info!(
                    target_game,
                    "Prediction resolved before delivery completed, applying final edit"
                );
                vec![Effect::EditBroadcast {
                    target_game,
                    refs: handles.into_iter().collect(),
                    text,
                }]
            }
            None => {
                warn!(target_game, "Handles for unknown prediction dropped");
                Vec::new()
            }
        }
    }

    /// Reset if the open prediction has been waiting longer than the timeout.
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.book.is_stale(now, self.config.prediction_timeout) {
            warn!(
                event = "prediction_timeout",
                timeout_mins = self.config.prediction_timeout.num_minutes(),
                "⏰ Open prediction exceeded its timeout"
            );
            self.reset(ResetReason::PredictionTimeout, now)
        } else {
            Vec::new()
        }
    }

    /// Clear history, pending games, predictions, streaks and counters. Thresholds,
    /// mode and destinations are kept.
    pub fn reset(&mut self, reason: ResetReason, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = Vec::new();
        let expired = self.book.reset();
        if let Some(pred) = &expired {
            let text = pred.render();
            self.push_edit(pred, text, &mut effects);
        }

        let dropped_games = self.history.len();
        self.history.clear();
        self.pending.clear();
        self.streak = StreakState::default();
        self.even_count = 0;
        self.odd_count = 0;
        self.last_game_number = None;
        self.last_total = None;

        warn!(
            event = "engine_reset",
            reason = %reason,
            dropped_games,
            expired_target = expired.as_ref().map(|p| p.target_game),
            at = %now,
            "🔄 Engine reset ({})",
            reason
        );
        effects.push(Effect::NotifyAdmin(format!(
            "🔄 Reset performed ({})\n{} games cleared{}",
            reason,
            dropped_games,
            expired
                .map(|p| format!(", prediction #{} expired", p.target_game))
                .unwrap_or_default()
        )));
        effects
    }

    pub fn force_reset(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        self.reset(ResetReason::Admin, now)
    }

    /// Switch mode; entering auto recomputes from the current window.
    pub fn set_mode(&mut self, mode: GapMode) -> ParityPair {
        self.gaps.set_mode(mode);
        if mode == GapMode::Auto {
            let window = self.history.window(self.history.capacity());
            self.gaps.refresh(&window, self.history.capacity());
        }
        let active = self.gaps.active();
        info!(event = "mode_changed", mode = %mode, even = active.even, odd = active.odd, "⚙️ Gap mode set");
        active
    }

    /// Set a manual threshold. Takes effect immediately when in manual mode.
    pub fn set_gap(&mut self, parity: Parity, value: u32) -> Result<ParityPair, EngineError> {
        self.gaps.set_manual(parity, value)?;
        info!(event = "manual_gap_set", parity = %parity, value, "⚙️ Manual gap set");
        Ok(self.gaps.manual_values())
    }

    pub fn add_destination(&mut self, id: DestinationId) -> Result<(), EngineError> {
        if !self.destinations.insert(id) {
            return Err(EngineError::DuplicateDestination(id));
        }
        info!(event = "destination_added", destination = id, "📡 Destination added");
        Ok(())
    }

    pub fn remove_destination(&mut self, id: DestinationId) -> Result<(), EngineError> {
        if !self.destinations.remove(&id) {
            return Err(EngineError::UnknownDestination(id));
        }
        info!(event = "destination_removed", destination = id, "📡 Destination removed");
        Ok(())
    }

    pub fn list_destinations(&self) -> Vec<DestinationId> {
        self.destinations.iter().copied().collect()
    }

    pub fn counters(&self) -> Counters {
        let (made, won, lost) = self.book.tally();
        Counters {
            predictions_made: made,
            predictions_won: won,
            predictions_lost: lost,
            even_count: self.even_count,
            odd_count: self.odd_count,
        }
    }

    pub fn thresholds(&self) -> ParityPair {
        self.gaps.active()
    }

    pub fn mode(&self) -> GapMode {
        self.gaps.mode()
    }

    pub fn streak(&self) -> StreakState {
        self.streak
    }

    pub fn open_prediction(&self) -> Option<&Prediction> {
        self.book.open_prediction()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn get_status(&self) -> StatusSnapshot {
        StatusSnapshot {
            last_game_number: self.last_game_number,
            last_total: self.last_total,
            counters: self.counters(),
            streak: self.streak,
            mode: self.gaps.mode(),
            thresholds: self.gaps.active(),
            open_prediction: self.book.open_prediction().cloned(),
            history_len: self.history.len(),
            history_capacity: self.history.capacity(),
        }
    }

    pub fn get_info(&self) -> InfoSnapshot {
        InfoSnapshot {
            destinations: self.list_destinations(),
            last_game_number: self.last_game_number,
            pending_finalization: self.pending.len(),
            open_predictions: usize::from(self.book.has_open()),
        }
    }

    /// Last `n` games with game-number gap statistics over the same slice.
    pub fn get_history(&self, n: usize) -> HistorySnapshot {
        let window = self.history.window(n);
        HistorySnapshot {
            gap_stats: game_number_gap_stats(&window),
            games: window.into_iter().cloned().collect(),
            mode: self.gaps.mode(),
            thresholds: self.gaps.active(),
        }
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        let window = self.history.window(self.history.capacity());
        let counters = self.counters();
        StatsSnapshot {
            games_analyzed: window.len(),
            gap_stats: game_number_gap_stats(&window),
            mode: self.gaps.mode(),
            thresholds: self.gaps.active(),
            auto_thresholds: self.gaps.auto_values(),
            manual_thresholds: self.gaps.manual_values(),
            win_rate_percent: counters.win_rate_percent(),
            counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(capacity: usize) -> Engine {
        Engine::new(
            EngineConfig {
                history_capacity: capacity,
                ..EngineConfig::default()
            },
            vec![-100, -200],
        )
    }

    fn finalized(game: u64, total: u32) -> String {
        format!("✅ #N{} #T{} result", game, total)
    }

    #[test]
    fn test_pending_then_finalized() {
        let mut e = engine(5);
        let now = Utc::now();
        let r = e.ingest("⏰ #N7 #T3", false, now);
        assert_eq!(r.outcome, IngestOutcome::Pending { game_number: 7 });
        assert_eq!(e.pending_len(), 1);

        let r = e.ingest(&finalized(7, 9), false, now);
        assert!(matches!(r.outcome, IngestOutcome::Recorded { game_number: 7, parity: Parity::Odd, replaced: false }));
        assert_eq!(e.pending_len(), 0);
        assert_eq!(e.counters().odd_count, 1);
    }

    #[test]
    fn test_finalized_without_total_clears_pending() {
        let mut e = engine(5);
        let now = Utc::now();
        e.ingest("▶️ #N8", false, now);
        let r = e.ingest("✅ #N8 done", false, now);
        assert_eq!(r.outcome, IngestOutcome::MissingTotal { game_number: 8 });
        assert_eq!(e.pending_len(), 0);
        assert_eq!(e.history_len(), 0);
    }

    #[test]
    fn test_duplicate_ignored_edit_replaces() {
        let mut e = engine(5);
        let now = Utc::now();
        e.ingest(&finalized(3, 4), false, now);
        let r = e.ingest(&finalized(3, 5), false, now);
        assert_eq!(r.outcome, IngestOutcome::DuplicateGame { game_number: 3 });
        assert_eq!(e.counters().even_count, 1);

        let r = e.ingest(&finalized(3, 5), true, now);
        assert!(matches!(r.outcome, IngestOutcome::Recorded { replaced: true, .. }));
        let c = e.counters();
        assert_eq!((c.even_count, c.odd_count), (0, 1));
        assert_eq!(e.streak(), StreakState { even_run: 0, odd_run: 1 });
    }

    #[test]
    fn test_no_prediction_before_window_full() {
        let mut e = engine(5);
        let now = Utc::now();
        for g in 1..=4 {
            let r = e.ingest(&finalized(g, 2), false, now);
            assert!(r.effects.is_empty());
        }
        assert!(e.open_prediction().is_none());
    }

    #[test]
    fn test_prediction_opens_and_broadcasts() {
        let mut e = engine(5);
        let now = Utc::now();
        let mut last = None;
        for g in 1..=5 {
            last = Some(e.ingest(&finalized(g, 2), false, now));
        }
        let report = last.unwrap();
        let open = e.open_prediction().unwrap();
        assert_eq!(open.target_game, 6);
        assert_eq!(open.predicted, Parity::Odd);
        assert!(matches!(
            &report.effects[0],
            Effect::Broadcast { target_game: 6, destinations, .. } if destinations == &vec![-200, -100]
        ));
        assert!(matches!(report.effects[1], Effect::NotifyAdmin(_)));
    }

    #[test]
    fn test_resolution_before_handles_defers_edit() {
        let mut e = engine(5);
        let now = Utc::now();
        for g in 1..=5 {
            e.ingest(&finalized(g, 2), false, now);
        }
        let r = e.ingest(&finalized(6, 3), false, now);
        assert!(!r
            .effects
            .iter()
            .any(|eff| matches!(eff, Effect::EditBroadcast { .. })));
        assert_eq!(e.counters().predictions_won, 1);

        let mut handles = BTreeMap::new();
        handles.insert(-100, MessageHandle(11));
        let effects = e.record_handles(6, handles);
        match &effects[..] {
            [Effect::EditBroadcast { target_game: 6, refs, text }] => {
                assert_eq!(refs, &vec![(-100, MessageHandle(11))]);
                assert!(text.contains("WON"));
            }
            other => panic!("unexpected effects {:?}", other),
        }
        // Applied once only.
        let mut again = BTreeMap::new();
        again.insert(-100, MessageHandle(11));
        assert!(e.record_handles(6, again).is_empty());
    }

    #[test]
    fn test_resolution_with_handles_edits_immediately() {
        let mut e = engine(5);
        let now = Utc::now();
        for g in 1..=5 {
            e.ingest(&finalized(g, 2), false, now);
        }
        let mut handles = BTreeMap::new();
        handles.insert(-100, MessageHandle(1));
        handles.insert(-200, MessageHandle(2));
        assert!(e.record_handles(6, handles).is_empty());

        e.ingest(&finalized(6, 2), false, now);
        e.ingest(&finalized(7, 4), false, now);
        let r = e.ingest(&finalized(8, 6), false, now);
        let edit = r
            .effects
            .iter()
            .find_map(|eff| match eff {
                Effect::EditBroadcast { refs, text, .. } => Some((refs.len(), text.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(edit.0, 2);
        assert!(edit.1.contains("LOST"));
        assert_eq!(e.counters().predictions_lost, 1);
    }

    #[test]
    fn test_timeout_resets_engine() {
        let mut e = engine(5);
        let opened = Utc::now();
        for g in 1..=5 {
            e.ingest(&finalized(g, 2), false, opened);
        }
        assert!(e.check_timeout(opened + Duration::minutes(10)).is_empty());
        let effects = e.check_timeout(opened + Duration::minutes(21));
        assert!(effects.iter().any(|eff| matches!(eff, Effect::NotifyAdmin(_))));
        assert!(e.open_prediction().is_none());
        assert_eq!(e.history_len(), 0);
        assert_eq!(e.counters(), Counters::default());
    }

    #[test]
    fn test_reset_keeps_configuration() {
        let mut e = engine(5);
        e.set_mode(GapMode::Manual);
        e.set_gap(Parity::Even, 6).unwrap();
        e.ingest(&finalized(1, 2), false, Utc::now());
        e.force_reset(Utc::now());
        assert_eq!(e.mode(), GapMode::Manual);
        assert_eq!(e.thresholds(), ParityPair { even: 6, odd: 3 });
        assert_eq!(e.list_destinations(), vec![-200, -100]);
        assert_eq!(e.get_status().last_game_number, None);
    }

    #[test]
    fn test_destination_validation() {
        let mut e = engine(5);
        assert_eq!(
            e.add_destination(-100),
            Err(EngineError::DuplicateDestination(-100))
        );
        assert_eq!(
            e.remove_destination(-300),
            Err(EngineError::UnknownDestination(-300))
        );
        assert!(e.add_destination(-300).is_ok());
        assert!(e.remove_destination(-100).is_ok());
        assert_eq!(e.list_destinations(), vec![-300, -200]);
    }

    #[test]
    fn test_set_gap_out_of_range() {
        let mut e = engine(5);
        assert!(matches!(
            e.set_gap(Parity::Odd, 11),
            Err(EngineError::GapOutOfRange { value: 11, .. })
        ));
    }

    #[test]
    fn test_history_snapshot() {
        let mut e = engine(10);
        let now = Utc::now();
        for (g, t) in [(1, 2), (2, 3), (4, 6), (5, 7)] {
            e.ingest(&finalized(g, t), false, now);
        }
        let snap = e.get_history(3);
        let numbers: Vec<u64> = snap.games.iter().map(|o| o.game_number).collect();
        assert_eq!(numbers, vec![2, 4, 5]);
        assert_eq!(snap.gap_stats.odd_max, 3);
    }
}
