// Session data: selection, active race, live progress, finished history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{FinishedRace, RocketProgress};

/// Maximum number of rockets in a selection.
pub const MAX_SELECTED: usize = 2;

/// Maximum number of races kept in the finished history.
pub const HISTORY_CAPACITY: usize = 10;

/// Everything the session persists and replicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Selected rocket ids in insertion order.
    #[serde(default)]
    pub selected_rockets: Vec<String>,
    #[serde(default)]
    pub active_race_id: Option<String>,
    /// When this tab learned about the active race.
    #[serde(default)]
    pub race_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rocket_progress: BTreeMap<String, RocketProgress>,
    /// Newest first, unique by race id.
    #[serde(default)]
    pub finished_races: Vec<FinishedRace>,
}

impl SessionState {
    /// Apply the selection rule for `rocket_id`: toggle off when already
    /// selected, otherwise append and evict the oldest beyond two.
    pub fn toggle_selection(&mut self, rocket_id: &str) {
        if let Some(pos) = self.selected_rockets.iter().position(|id| id == rocket_id) {
            self.selected_rockets.remove(pos);
            return;
        }
        if self.selected_rockets.len() >= MAX_SELECTED {
            let overflow = self.selected_rockets.len() + 1 - MAX_SELECTED;
            self.selected_rockets.drain(..overflow);
        }
        self.selected_rockets.push(rocket_id.to_string());
    }

    /// Prepend a finished race unless its id is already in the history.
    /// Returns `false` for a duplicate.
    pub fn insert_finished(&mut self, record: FinishedRace) -> bool {
        if self.finished_races.iter().any(|r| r.id == record.id) {
            return false;
        }
        self.finished_races.insert(0, record);
        self.finished_races.truncate(HISTORY_CAPACITY);
        true
    }

    pub fn has_finished(&self, race_id: &str) -> bool {
        self.finished_races.iter().any(|r| r.id == race_id)
    }

    /// Repair a snapshot restored from storage so the selection and history
    /// invariants hold again.
    pub fn normalize(&mut self) {
        let mut seen: Vec<String> = Vec::with_capacity(MAX_SELECTED);
        for id in self.selected_rockets.drain(..) {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        if seen.len() > MAX_SELECTED {
            seen.drain(..seen.len() - MAX_SELECTED);
        }
        self.selected_rockets = seen;

        let mut history: Vec<FinishedRace> = Vec::with_capacity(HISTORY_CAPACITY);
        for record in self.finished_races.drain(..) {
            if !history.iter().any(|r| r.id == record.id) {
                history.push(record);
            }
        }
        history.truncate(HISTORY_CAPACITY);
        self.finished_races = history;

        for progress in self.rocket_progress.values_mut() {
            *progress = RocketProgress::new(progress.progress, progress.exploded);
        }

        if self.active_race_id.is_none() {
            self.race_started_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RaceParticipant;

    fn record(id: &str) -> FinishedRace {
        FinishedRace {
            id: id.into(),
            winner: None,
            rocket1: RaceParticipant {
                id: "a".into(),
                progress: 100,
                exploded: false,
            },
            rocket2: RaceParticipant {
                id: "b".into(),
                progress: 10,
                exploded: false,
            },
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn toggle_adds_then_removes() {
        let mut state = SessionState::default();
        state.toggle_selection("A");
        assert_eq!(state.selected_rockets, vec!["A"]);
        state.toggle_selection("A");
        assert!(state.selected_rockets.is_empty());
    }

    #[test]
    fn third_selection_evicts_first() {
        let mut state = SessionState::default();
        state.toggle_selection("A");
        state.toggle_selection("B");
        state.toggle_selection("C");
        assert_eq!(state.selected_rockets, vec!["B", "C"]);
    }

    #[test]
    fn deselecting_first_keeps_second() {
        let mut state = SessionState::default();
        state.toggle_selection("A");
        state.toggle_selection("B");
        state.toggle_selection("A");
        assert_eq!(state.selected_rockets, vec!["B"]);
    }

    #[test]
    fn insert_finished_is_newest_first_and_bounded() {
        let mut state = SessionState::default();
        for i in 0..11 {
            assert!(state.insert_finished(record(&format!("race-{i}"))));
        }
        assert_eq!(state.finished_races.len(), HISTORY_CAPACITY);
        assert_eq!(state.finished_races[0].id, "race-10");
        assert!(!state.has_finished("race-0"), "oldest race should be evicted");
        assert!(state.has_finished("race-1"));
    }

    #[test]
    fn insert_finished_rejects_duplicate_ids() {
        let mut state = SessionState::default();
        assert!(state.insert_finished(record("race-1")));
        assert!(!state.insert_finished(record("race-1")));
        assert_eq!(state.finished_races.len(), 1);
    }

    #[test]
    fn normalize_repairs_restored_snapshot() {
        let mut state = SessionState {
            selected_rockets: vec!["A".into(), "A".into(), "B".into(), "C".into()],
            finished_races: (0..12)
                .map(|i| record(&format!("race-{}", i % 11)))
                .collect(),
            race_started_at: Some(Utc::now()),
            ..Default::default()
        };
        state
            .rocket_progress
            .insert("A".into(), RocketProgress { progress: 180, exploded: false });

        state.normalize();

        assert_eq!(state.selected_rockets, vec!["B", "C"]);
        assert_eq!(state.finished_races.len(), HISTORY_CAPACITY);
        assert_eq!(state.rocket_progress["A"].progress, 100);
        assert!(state.race_started_at.is_none());
    }
}
