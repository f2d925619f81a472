//! Prediction lifecycle: open → won | lost | expired.
//!
//! At most one prediction is open at any time. Verification only considers games
//! at offsets `0..PREDICTION_WINDOW` from the target, and each game counts once no
//! matter how often the feed redelivers or edits it.

use crate::error::EngineError;
use crate::types::{
    DestinationId, GameObservation, MessageHandle, Parity, ParityPair, Prediction,
    PredictionStatus, StreakState, PREDICTION_WINDOW,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Result of checking one observation against the open prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// No open prediction, or the game is outside its window.
    NotApplicable,
    /// Game already counted for this prediction.
    AlreadyChecked,
    /// Mismatch, prediction stays open with `checked` games counted so far.
    StillOpen { checked: usize },
    /// Terminal: the resolved prediction, already removed from the open slot.
    Resolved(Prediction),
}

/// Parity to predict given the current run, or `None` if no trigger fires.
///
/// Fires when a run reaches `threshold - 1`: the break is called one game before the
/// historically observed maximum gap.
pub fn trigger(streak: &StreakState, thresholds: &ParityPair) -> Option<Parity> {
    let (parity, run) = streak.current()?;
    let threshold = thresholds.get(parity);
    if run >= threshold.saturating_sub(1) {
        Some(parity.opposite())
    } else {
        None
    }
}

#[derive(Debug, Default)]
pub struct PredictionBook {
    open: Option<Prediction>,
    made: u64,
    won: u64,
    lost: u64,
}

impl PredictionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_prediction(&self) -> Option<&Prediction> {
        self.open.as_ref()
    }

    pub fn has_open(&self) -> bool {
        self.open.is_some()
    }

    /// (made, won, lost)
    pub fn tally(&self) -> (u64, u64, u64) {
        (self.made, self.won, self.lost)
    }

    /// Open a new prediction. Callers check [`has_open`](Self::has_open) first;
    /// reaching the error path means that guard was skipped.
    pub fn open(
        &mut self,
        target_game: u64,
        predicted: Parity,
        now: DateTime<Utc>,
    ) -> Result<&Prediction, EngineError> {
        if let Some(existing) = &self.open {
            let msg = format!(
                "prediction for game {} requested while game {} is still open",
                target_game, existing.target_game
            );
            error!(event = "invariant_violation", "{}", msg);
            debug_assert!(false, "{}", msg);
            return Err(EngineError::InvariantViolation(msg));
        }
        self.made += 1;
        Ok(&*self
            .open
            .insert(Prediction::new(target_game, predicted, now)))
    }

    pub fn verify(&mut self, obs: &GameObservation) -> Verification {
        let Some(pred) = self.open.as_mut() else {
            return Verification::NotApplicable;
        };
        if obs.game_number < pred.target_game {
            return Verification::NotApplicable;
        }
        let offset = obs.game_number - pred.target_game;
        if offset >= PREDICTION_WINDOW as u64 {
            return Verification::NotApplicable;
        }
        if !pred.checked_games.insert(obs.game_number) {
            debug!(
                game = obs.game_number,
                target_game = pred.target_game,
                "Game already checked for open prediction"
            );
            return Verification::AlreadyChecked;
        }

        if obs.parity == pred.predicted {
            pred.status = PredictionStatus::Won { offset };
            self.won += 1;
        } else if pred.checked_games.len() >= PREDICTION_WINDOW {
            pred.status = PredictionStatus::Lost;
            self.lost += 1;
        } else {
            return Verification::StillOpen {
                checked: pred.checked_games.len(),
            };
        }

        match self.open.take() {
            Some(resolved) => Verification::Resolved(resolved),
            None => Verification::NotApplicable,
        }
    }

    /// Attach delivered broadcast handles. Returns `false` if `target_game` is no
    /// longer the open prediction.
    pub fn record_handles(
        &mut self,
        target_game: u64,
        handles: &BTreeMap<DestinationId, MessageHandle>,
    ) -> bool {
        match self.open.as_mut() {
            Some(pred) if pred.target_game == target_game => {
                pred.broadcast_refs
                    .extend(handles.iter().map(|(d, h)| (*d, *h)));
                true
            }
            _ => false,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.open
            .as_ref()
            .map(|p| now - p.opened_at > timeout)
            .unwrap_or(false)
    }

    /// Take the open prediction out as `Expired`, if any.
    pub fn expire(&mut self) -> Option<Prediction> {
        self.open.take().map(|mut p| {
            p.status = PredictionStatus::Expired;
            p
        })
    }

    /// Drop any open prediction and zero the counters.
    pub fn reset(&mut self) -> Option<Prediction> {
        let expired = self.expire();
        self.made = 0;
        self.won = 0;
        self.lost = 0;
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(game: u64, total: u32) -> GameObservation {
        GameObservation::new(game, total, Utc::now())
    }

    #[test]
    fn test_trigger_at_threshold_minus_one() {
        let thresholds = ParityPair { even: 4, odd: 4 };
        let two_even = StreakState {
            even_run: 2,
            odd_run: 0,
        };
        let three_even = StreakState {
            even_run: 3,
            odd_run: 0,
        };
        assert_eq!(trigger(&two_even, &thresholds), None);
        assert_eq!(trigger(&three_even, &thresholds), Some(Parity::Odd));

        let one_odd = StreakState {
            even_run: 0,
            odd_run: 1,
        };
        assert_eq!(
            trigger(&one_odd, &ParityPair { even: 5, odd: 2 }),
            Some(Parity::Even)
        );
        assert_eq!(trigger(&StreakState::default(), &thresholds), None);
    }

    #[test]
    fn test_win_on_third_game() {
        let mut book = PredictionBook::new();
        book.open(105, Parity::Odd, Utc::now()).unwrap();

        assert_eq!(
            book.verify(&obs(105, 8)),
            Verification::StillOpen { checked: 1 }
        );
        assert_eq!(
            book.verify(&obs(106, 4)),
            Verification::StillOpen { checked: 2 }
        );
        match book.verify(&obs(107, 9)) {
            Verification::Resolved(p) => {
                assert_eq!(p.status, PredictionStatus::Won { offset: 2 });
                let checked: Vec<u64> = p.checked_games.iter().copied().collect();
                assert_eq!(checked, vec![105, 106, 107]);
            }
            other => panic!("expected resolution, got {:?}", other),
        }
        assert!(!book.has_open());
        assert_eq!(book.tally(), (1, 1, 0));
    }

    #[test]
    fn test_loss_after_three_misses() {
        let mut book = PredictionBook::new();
        book.open(10, Parity::Even, Utc::now()).unwrap();
        book.verify(&obs(10, 1));
        book.verify(&obs(11, 3));
        match book.verify(&obs(12, 5)) {
            Verification::Resolved(p) => assert_eq!(p.status, PredictionStatus::Lost),
            other => panic!("expected loss, got {:?}", other),
        }
        assert_eq!(book.tally(), (1, 0, 1));
    }

    #[test]
    fn test_out_of_window_games_ignored() {
        let mut book = PredictionBook::new();
        book.open(50, Parity::Even, Utc::now()).unwrap();
        assert_eq!(book.verify(&obs(49, 2)), Verification::NotApplicable);
        assert_eq!(book.verify(&obs(53, 2)), Verification::NotApplicable);
        assert!(book.has_open());
    }

    #[test]
    fn test_redelivered_game_counts_once() {
        let mut book = PredictionBook::new();
        book.open(20, Parity::Even, Utc::now()).unwrap();
        book.verify(&obs(20, 1));
        assert_eq!(book.verify(&obs(20, 1)), Verification::AlreadyChecked);
        // Even an edit that would now match does not flip a counted game.
        assert_eq!(book.verify(&obs(20, 2)), Verification::AlreadyChecked);
        assert_eq!(
            book.verify(&obs(21, 1)),
            Verification::StillOpen { checked: 2 }
        );
    }

    #[test]
    fn test_out_of_order_games_within_window() {
        let mut book = PredictionBook::new();
        book.open(30, Parity::Odd, Utc::now()).unwrap();
        book.verify(&obs(32, 2));
        book.verify(&obs(30, 2));
        match book.verify(&obs(31, 3)) {
            Verification::Resolved(p) => {
                assert_eq!(p.status, PredictionStatus::Won { offset: 1 })
            }
            other => panic!("expected win, got {:?}", other),
        }
    }

    #[test]
    fn test_second_open_is_invariant_violation() {
        let mut book = PredictionBook::new();
        book.open(1, Parity::Odd, Utc::now()).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            book.open(2, Parity::Even, Utc::now()).map(|_| ())
        }));
        // Debug builds assert; release builds return the error.
        match result {
            Ok(r) => assert!(matches!(r, Err(EngineError::InvariantViolation(_)))),
            Err(_) => assert!(cfg!(debug_assertions)),
        }
    }

    #[test]
    fn test_staleness_and_expiry() {
        let mut book = PredictionBook::new();
        let opened = Utc::now();
        book.open(9, Parity::Odd, opened).unwrap();
        assert!(!book.is_stale(opened + Duration::minutes(19), Duration::minutes(20)));
        assert!(book.is_stale(opened + Duration::minutes(21), Duration::minutes(20)));
        let expired = book.reset().unwrap();
        assert_eq!(expired.status, PredictionStatus::Expired);
        assert_eq!(book.tally(), (0, 0, 0));
    }

    #[test]
    fn test_record_handles_only_for_open_target() {
        let mut book = PredictionBook::new();
        book.open(9, Parity::Odd, Utc::now()).unwrap();
        let mut handles = BTreeMap::new();
        handles.insert(-100_i64, MessageHandle(77));
        assert!(!book.record_handles(8, &handles));
        assert!(book.record_handles(9, &handles));
        assert_eq!(
            book.open_prediction().unwrap().broadcast_refs.get(&-100),
            Some(&MessageHandle(77))
        );
    }
}
