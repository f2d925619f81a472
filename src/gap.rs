//! Gap thresholds: how many positions may separate two occurrences of the same
//! parity before the engine considers that parity overdue.

use crate::error::EngineError;
use crate::types::{GameObservation, GapMode, Parity, ParityPair};
use serde::Serialize;

pub const AUTO_GAP_MIN: u32 = 2;
pub const AUTO_GAP_MAX: u32 = 8;
pub const MANUAL_GAP_MIN: u32 = 2;
pub const MANUAL_GAP_MAX: u32 = 10;
pub const DEFAULT_GAP: u32 = 3;

/// Largest positional gap per parity inside `window`, clamped to the auto range.
///
/// Positions are indices within the slice, not game numbers, so holes in the feed's
/// numbering do not inflate the gap. A parity seen fewer than twice yields `None`.
pub fn max_positional_gaps(window: &[&GameObservation]) -> (Option<u32>, Option<u32>) {
    let mut last_even: Option<usize> = None;
    let mut last_odd: Option<usize> = None;
    let mut max_even: Option<u32> = None;
    let mut max_odd: Option<u32> = None;

    for (index, obs) in window.iter().enumerate() {
        let (last, max) = match obs.parity {
            Parity::Even => (&mut last_even, &mut max_even),
            Parity::Odd => (&mut last_odd, &mut max_odd),
        };
        if let Some(prev) = *last {
            let gap = (index - prev) as u32;
            *max = Some(max.map_or(gap, |m| m.max(gap)));
        }
        *last = Some(index);
    }

    let clamp = |g: u32| g.clamp(AUTO_GAP_MIN, AUTO_GAP_MAX);
    (max_even.map(clamp), max_odd.map(clamp))
}

/// Auto/manual threshold selection. Only one source is active at a time.
#[derive(Debug, Clone, Serialize)]
pub struct GapEstimator {
    mode: GapMode,
    auto: ParityPair,
    manual: ParityPair,
}

impl Default for GapEstimator {
    fn default() -> Self {
        Self::new(GapMode::Auto)
    }
}

impl GapEstimator {
    pub fn new(mode: GapMode) -> Self {
        Self {
            mode,
            auto: ParityPair {
                even: DEFAULT_GAP,
                odd: DEFAULT_GAP,
            },
            manual: ParityPair {
                even: DEFAULT_GAP,
                odd: DEFAULT_GAP,
            },
        }
    }

    pub fn mode(&self) -> GapMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: GapMode) {
        self.mode = mode;
    }

    /// Thresholds currently driving the open decision.
    pub fn active(&self) -> ParityPair {
        match self.mode {
            GapMode::Auto => self.auto,
            GapMode::Manual => self.manual,
        }
    }

    pub fn auto_values(&self) -> ParityPair {
        self.auto
    }

    pub fn manual_values(&self) -> ParityPair {
        self.manual
    }

    pub fn set_manual(&mut self, parity: Parity, value: u32) -> Result<(), EngineError> {
        if !(MANUAL_GAP_MIN..=MANUAL_GAP_MAX).contains(&value) {
            return Err(EngineError::GapOutOfRange {
                value,
                min: MANUAL_GAP_MIN,
                max: MANUAL_GAP_MAX,
            });
        }
        self.manual.set(parity, value);
        Ok(())
    }

    /// Recompute auto thresholds from a full window. Returns `true` when the values
    /// changed. Does nothing in manual mode or when `window` is shorter than `required`.
    pub fn refresh(&mut self, window: &[&GameObservation], required: usize) -> bool {
        if self.mode != GapMode::Auto || window.len() < required {
            return false;
        }
        let before = self.auto;
        let (even, odd) = max_positional_gaps(window);
        if let Some(even) = even {
            self.auto.even = even;
        }
        if let Some(odd) = odd {
            self.auto.odd = odd;
        }
        self.auto != before
    }
}

/// Display statistics over game-number gaps, for the history and stats commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GapStats {
    pub even_max: u64,
    pub even_mean: f64,
    pub odd_max: u64,
    pub odd_mean: f64,
}

pub fn game_number_gap_stats(window: &[&GameObservation]) -> GapStats {
    let gaps_for = |parity: Parity| -> Vec<u64> {
        let numbers: Vec<u64> = window
            .iter()
            .filter(|o| o.parity == parity)
            .map(|o| o.game_number)
            .collect();
        numbers.windows(2).map(|w| w[1] - w[0]).collect()
    };
    let summarize = |gaps: &[u64]| -> (u64, f64) {
        if gaps.is_empty() {
            return (0, 0.0);
        }
        let max = gaps.iter().copied().max().unwrap_or(0);
        let mean = gaps.iter().sum::<u64>() as f64 / gaps.len() as f64;
        (max, mean)
    };

    let (even_max, even_mean) = summarize(&gaps_for(Parity::Even));
    let (odd_max, odd_mean) = summarize(&gaps_for(Parity::Odd));
    GapStats {
        even_max,
        even_mean,
        odd_max,
        odd_mean,
    }
}
