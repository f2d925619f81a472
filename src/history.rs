//! Bounded, game-number-ordered window of finalized observations.

use crate::types::GameObservation;
use std::collections::BTreeMap;

/// Result of [`HistoryStore::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted { evicted: Option<GameObservation> },
    Replaced { previous: GameObservation },
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    capacity: usize,
    games: BTreeMap<u64, GameObservation>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            games: BTreeMap::new(),
        }
    }

    /// Insert or overwrite the entry for `observation.game_number`, evicting the
    /// smallest game number if the window grows past capacity.
    pub fn record(&mut self, observation: GameObservation) -> RecordOutcome {
        if let Some(previous) = self
            .games
            .insert(observation.game_number, observation)
        {
            return RecordOutcome::Replaced { previous };
        }

        let evicted = if self.games.len() > self.capacity {
            self.games.pop_first().map(|(_, obs)| obs)
        } else {
            None
        };
        RecordOutcome::Inserted { evicted }
    }

    pub fn contains(&self, game_number: u64) -> bool {
        self.games.contains_key(&game_number)
    }

    pub fn get(&self, game_number: u64) -> Option<&GameObservation> {
        self.games.get(&game_number)
    }

    /// The last `n` observations in ascending game-number order.
    pub fn window(&self, n: usize) -> Vec<&GameObservation> {
        let skip = self.games.len().saturating_sub(n);
        self.games.values().skip(skip).collect()
    }

    /// Iterate newest first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &GameObservation> {
        self.games.values().rev()
    }

    pub fn latest(&self) -> Option<&GameObservation> {
        self.games.values().next_back()
    }

    pub fn oldest(&self) -> Option<&GameObservation> {
        self.games.values().next()
    }

    /// A new game below this would be evicted the moment it was inserted.
    pub fn is_behind_window(&self, game_number: u64) -> bool {
        self.is_full()
            && !self.contains(game_number)
            && self.oldest().is_some_and(|o| game_number < o.game_number)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.games.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.games.clear();
    }
}
