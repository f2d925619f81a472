//! Current same-parity run, derived from the history tail.

use crate::history::HistoryStore;
use crate::types::{Parity, StreakState};

/// Count the run of the most recent parity, scanning newest first and stopping at
/// the first observation of the opposite parity.
pub fn compute(history: &HistoryStore) -> StreakState {
    let mut recent = history.iter_recent();
    let Some(first) = recent.next() else {
        return StreakState::default();
    };

    let run = 1 + recent.take_while(|o| o.parity == first.parity).count() as u32;
    match first.parity {
        Parity::Even => StreakState {
            even_run: run,
            odd_run: 0,
        },
        Parity::Odd => StreakState {
            even_run: 0,
            odd_run: run,
        },
    }
}
