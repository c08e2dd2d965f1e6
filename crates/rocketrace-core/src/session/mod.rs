// Race session state machine.
//
// Owns selection, active race identity, live progress and finished history.
// Every mutation is expressed as a `SessionMessage`, applied in one place, and
// recorded as a `Change` tagged with its `Origin` so the caller can replicate
// local changes and persist the result.

pub mod message;
pub mod state;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::model::{FinishedRace, Race, RocketProgress};
use crate::transport::{RaceTransport, TransportError};

pub use message::{Change, Origin, SessionMessage};
pub use state::{SessionState, HISTORY_CAPACITY, MAX_SELECTED};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// When a race counts as finished from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Finished as soon as either tracked rocket reaches 100 or explodes.
    #[default]
    FirstToFinish,
    /// Finished once every tracked rocket has reached 100 or exploded.
    AllFinished,
}

/// Lifecycle phase derived from the session data and reconcile status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    Idle,
    Selecting,
    Racing,
    Reconciling,
    /// Reconciliation ran out of attempts; the race stays active until the
    /// user retries or abandons it.
    Stuck,
}

/// Progress of the authoritative-result lookup for the active race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileStatus {
    #[default]
    NotStarted,
    /// Completion detected; waiting out the debounce.
    Scheduled,
    Polling,
    Exhausted,
}

/// Result of feeding one progress record into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Not racing; nothing changed.
    Ignored,
    Updated,
    /// Updated, and this update completed the race. Reconciliation should be
    /// scheduled after the debounce.
    Finished,
}

/// Result of handing a poller result back to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    Archived(FinishedRace),
    /// Another tab archived this race first; the session still returned to idle.
    Duplicate,
    /// The race is no longer the active one; the result was dropped.
    Stale,
}

// ---------------------------------------------------------------------------
// SessionMachine
// ---------------------------------------------------------------------------

pub struct SessionMachine {
    state: SessionState,
    policy: CompletionPolicy,
    reconcile: ReconcileStatus,
    changes: Vec<Change>,
}

impl SessionMachine {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self::restore(SessionState::default(), policy)
    }

    /// Resume from a persisted snapshot. Reconciliation always restarts from
    /// scratch; call [`SessionMachine::check_completion`] afterwards.
    pub fn restore(mut state: SessionState, policy: CompletionPolicy) -> Self {
        state.normalize();
        Self {
            state,
            policy,
            reconcile: ReconcileStatus::NotStarted,
            changes: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    pub fn reconcile_status(&self) -> ReconcileStatus {
        self.reconcile
    }

    pub fn selected(&self) -> &[String] {
        &self.state.selected_rockets
    }

    pub fn active_race_id(&self) -> Option<&str> {
        self.state.active_race_id.as_deref()
    }

    pub fn progress_of(&self, rocket_id: &str) -> Option<RocketProgress> {
        self.state.rocket_progress.get(rocket_id).copied()
    }

    pub fn finished_races(&self) -> &[crate::model::FinishedRace] {
        &self.state.finished_races
    }

    pub fn phase(&self) -> RacePhase {
        match (&self.state.active_race_id, self.reconcile) {
            (None, _) if self.state.selected_rockets.is_empty() => RacePhase::Idle,
            (None, _) => RacePhase::Selecting,
            (Some(_), ReconcileStatus::NotStarted | ReconcileStatus::Scheduled) => RacePhase::Racing,
            (Some(_), ReconcileStatus::Polling) => RacePhase::Reconciling,
            (Some(_), ReconcileStatus::Exhausted) => RacePhase::Stuck,
        }
    }

    /// Drain the changes applied since the last call, oldest first.
    pub fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }

    // --- User operations ---

    /// Toggle `rocket_id` in the selection. No-op while a race is active.
    pub fn select_entity(&mut self, rocket_id: &str) -> bool {
        if self.state.active_race_id.is_some() {
            debug!(rocket_id, "ignoring selection while a race is active");
            return false;
        }
        let mut next = self.state.clone();
        next.toggle_selection(rocket_id);
        self.apply_local(SessionMessage::SetSelectedEntities {
            entity_ids: next.selected_rockets,
        });
        true
    }

    /// Start a race between the two selected rockets.
    ///
    /// Returns `Ok(None)` without calling the server when the selection does
    /// not hold exactly two rockets or a race is already active. A transport
    /// failure leaves the session untouched and is returned as-is.
    pub async fn start_race<T>(&mut self, transport: &T) -> Result<Option<Race>, TransportError>
    where
        T: RaceTransport + ?Sized,
    {
        if self.state.active_race_id.is_some() {
            warn!("start_race called while a race is active");
            return Ok(None);
        }
        let [rocket1, rocket2] = match self.state.selected_rockets.as_slice() {
            [a, b] => [a.clone(), b.clone()],
            other => {
                warn!(selected = other.len(), "start_race needs exactly two rockets");
                return Ok(None);
            }
        };

        let race = transport.start_race(&rocket1, &rocket2).await?;
        info!(race_id = %race.id, %rocket1, %rocket2, "Race started");

        self.apply_local(SessionMessage::SetActiveRace {
            race_id: Some(race.id.clone()),
        });
        self.apply_local(SessionMessage::ClearProgress {});
        for rocket_id in [rocket1, rocket2] {
            self.apply_local(SessionMessage::UpdateProgress {
                entity_id: rocket_id,
                progress: RocketProgress::default(),
            });
        }
        Ok(Some(race))
    }

    /// Overwrite one rocket's live progress and run completion detection.
    pub fn record_progress(&mut self, rocket_id: &str, progress: u8, exploded: bool) -> ProgressOutcome {
        if self.phase() != RacePhase::Racing {
            debug!(rocket_id, phase = ?self.phase(), "ignoring progress outside a running race");
            return ProgressOutcome::Ignored;
        }
        self.apply_local(SessionMessage::UpdateProgress {
            entity_id: rocket_id.to_string(),
            progress: RocketProgress::new(progress, exploded),
        });
        if self.check_completion() {
            ProgressOutcome::Finished
        } else {
            ProgressOutcome::Updated
        }
    }

    /// Mark the race as finished if the completion policy says so and
    /// reconciliation hasn't been scheduled yet. Returns `true` when the caller
    /// should start the debounce.
    pub fn check_completion(&mut self) -> bool {
        if self.state.active_race_id.is_none() || self.reconcile != ReconcileStatus::NotStarted {
            return false;
        }
        if !self.is_race_finished() {
            return false;
        }
        info!(race_id = ?self.state.active_race_id, policy = ?self.policy, "Race completion detected");
        self.reconcile = ReconcileStatus::Scheduled;
        true
    }

    /// Whether the tracked rockets satisfy the completion policy.
    pub fn is_race_finished(&self) -> bool {
        let tracked = &self.state.selected_rockets;
        if tracked.len() != MAX_SELECTED {
            return false;
        }
        let finished = |id: &String| {
            self.state
                .rocket_progress
                .get(id)
                .is_some_and(|p| p.is_finished())
        };
        match self.policy {
            CompletionPolicy::FirstToFinish => tracked.iter().any(finished),
            CompletionPolicy::AllFinished => tracked.iter().all(finished),
        }
    }

    /// Drop the active race and return to idle. In-flight reconciliation is
    /// not cancelled here; its result will fail the staleness check.
    pub fn abandon(&mut self) -> bool {
        let Some(race_id) = self.state.active_race_id.clone() else {
            debug!("abandon called with no active race");
            return false;
        };
        info!(%race_id, "Race abandoned");
        self.clear_race();
        true
    }

    // --- Reconciliation ---

    /// The debounce for `race_id` elapsed: move to polling. Returns `false`
    /// when the race is no longer active or was not scheduled.
    pub fn begin_reconcile(&mut self, race_id: &str) -> bool {
        if self.active_race_id() != Some(race_id) || self.reconcile != ReconcileStatus::Scheduled {
            debug!(race_id, status = ?self.reconcile, "skipping reconcile for inactive race");
            return false;
        }
        self.reconcile = ReconcileStatus::Polling;
        true
    }

    /// User-requested retry of a stuck race. Returns the race id to poll.
    pub fn retry_reconcile(&mut self) -> Option<String> {
        if self.reconcile != ReconcileStatus::Exhausted {
            return None;
        }
        let race_id = self.state.active_race_id.clone()?;
        info!(%race_id, "Retrying race result lookup");
        self.reconcile = ReconcileStatus::Polling;
        Some(race_id)
    }

    /// The poller gave up on `race_id`. The race stays active and the session
    /// becomes [`RacePhase::Stuck`].
    pub fn reconcile_exhausted(&mut self, race_id: &str) -> bool {
        if self.active_race_id() != Some(race_id) || self.reconcile != ReconcileStatus::Polling {
            return false;
        }
        warn!(race_id, "Race result unavailable, session is stuck");
        self.reconcile = ReconcileStatus::Exhausted;
        true
    }

    /// Mark a restored race whose lookup was already given up on, so it comes
    /// back as [`RacePhase::Stuck`] instead of polling again.
    pub fn restore_exhausted(&mut self, race_id: &str) -> bool {
        if self.active_race_id() != Some(race_id) || self.reconcile != ReconcileStatus::NotStarted {
            return false;
        }
        self.reconcile = ReconcileStatus::Exhausted;
        true
    }

    /// The active race whose result lookup was given up on, if any.
    pub fn stuck_race_id(&self) -> Option<&str> {
        self.active_race_id()
            .filter(|_| self.reconcile == ReconcileStatus::Exhausted)
    }

    /// The poller resolved `race_id`. Archives the record unless the session
    /// has moved on since the poll started.
    pub fn complete_reconcile(&mut self, race_id: &str, race: Race) -> ArchiveOutcome {
        if self.active_race_id() != Some(race_id) {
            debug!(race_id, active = ?self.state.active_race_id, "discarding stale race result");
            return ArchiveOutcome::Stale;
        }
        let record = FinishedRace::from_race(race, self.state.race_started_at, Utc::now());
        if self.archive_race(record.clone()) {
            ArchiveOutcome::Archived(record)
        } else {
            ArchiveOutcome::Duplicate
        }
    }

    /// Add `record` to the finished history (deduplicated by id) and return
    /// the session to idle. Returns `false` if the id was already archived.
    pub fn archive_race(&mut self, record: FinishedRace) -> bool {
        let inserted = !self.state.has_finished(&record.id);
        if inserted {
            info!(race_id = %record.id, winner = ?record.winner, "Race archived");
            self.apply_local(SessionMessage::AddFinishedRace { record });
        } else {
            debug!(race_id = %record.id, "race already archived");
        }
        self.clear_race();
        inserted
    }

    // --- Replication ---

    /// Apply a message received from a sibling tab. Preconditions are not
    /// re-checked; finished-history deduplication still applies.
    pub fn apply_remote(&mut self, message: SessionMessage) {
        debug!(kind = message.kind(), "applying remote message");
        self.apply(message, Origin::Remote);
    }

    // --- Internals ---

    fn clear_race(&mut self) {
        self.apply_local(SessionMessage::SetActiveRace { race_id: None });
        self.apply_local(SessionMessage::SetSelectedEntities { entity_ids: Vec::new() });
        self.apply_local(SessionMessage::ClearProgress {});
    }

    fn apply_local(&mut self, message: SessionMessage) {
        self.apply(message, Origin::Local);
    }

    fn apply(&mut self, message: SessionMessage, origin: Origin) {
        match &message {
            SessionMessage::SetActiveRace { race_id } => {
                if self.state.active_race_id != *race_id {
                    self.reconcile = ReconcileStatus::NotStarted;
                    self.state.race_started_at = race_id.as_ref().map(|_| Utc::now());
                }
                self.state.active_race_id = race_id.clone();
            }
            SessionMessage::AddFinishedRace { record } => {
                if !self.state.insert_finished(record.clone()) {
                    debug!(race_id = %record.id, "finished race already in history");
                    return;
                }
            }
            SessionMessage::SetSelectedEntities { entity_ids } => {
                self.state.selected_rockets = entity_ids.clone();
            }
            SessionMessage::UpdateProgress { entity_id, progress } => {
                self.state
                    .rocket_progress
                    .insert(entity_id.clone(), RocketProgress::new(progress.progress, progress.exploded));
            }
            SessionMessage::ClearProgress {} => {
                self.state.rocket_progress.clear();
            }
        }
        self.changes.push(Change { origin, message });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RaceParticipant;
    use crate::test_support::{race, ScriptedTransport};

    fn racing_machine(policy: CompletionPolicy) -> SessionMachine {
        let mut machine = SessionMachine::new(policy);
        machine.select_entity("R1");
        machine.select_entity("R2");
        machine.apply_remote(SessionMessage::SetActiveRace {
            race_id: Some("race-9".into()),
        });
        machine.take_changes();
        machine
    }

    fn finished_record(id: &str) -> FinishedRace {
        FinishedRace::from_race(race(id, "R1", 100, "R2", 40, Some("R1")), None, Utc::now())
    }

    #[test]
    fn new_machine_is_idle() {
        let machine = SessionMachine::new(CompletionPolicy::default());
        assert_eq!(machine.phase(), RacePhase::Idle);
        assert_eq!(machine.policy(), CompletionPolicy::FirstToFinish);
    }

    #[test]
    fn selecting_same_rocket_twice_returns_to_idle() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.select_entity("A");
        assert_eq!(machine.phase(), RacePhase::Selecting);
        machine.select_entity("A");
        assert!(machine.selected().is_empty());
        assert_eq!(machine.phase(), RacePhase::Idle);
    }

    #[test]
    fn third_selection_replaces_oldest() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.select_entity("A");
        machine.select_entity("B");
        machine.select_entity("C");
        assert_eq!(machine.selected(), ["B", "C"]);
    }

    #[test]
    fn selection_emits_one_local_change_each() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.select_entity("A");
        machine.select_entity("B");
        let changes = machine.take_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.origin == Origin::Local));
        assert_eq!(
            changes[1].message,
            SessionMessage::SetSelectedEntities {
                entity_ids: vec!["A".into(), "B".into()]
            }
        );
    }

    #[test]
    fn selection_ignored_while_racing() {
        let mut machine = racing_machine(CompletionPolicy::default());
        assert!(!machine.select_entity("R3"));
        assert_eq!(machine.selected(), ["R1", "R2"]);
        assert!(machine.take_changes().is_empty());
    }

    #[tokio::test]
    async fn start_race_requires_two_selected() {
        let transport = ScriptedTransport::default();
        let mut machine = SessionMachine::new(CompletionPolicy::default());

        assert_eq!(machine.start_race(&transport).await.unwrap(), None);
        machine.select_entity("R1");
        assert_eq!(machine.start_race(&transport).await.unwrap(), None);

        assert!(machine.active_race_id().is_none());
        assert_eq!(transport.start_calls(), 0);
    }

    #[tokio::test]
    async fn start_race_resets_progress_for_selected() {
        let transport = ScriptedTransport::default();
        transport.push_start(Ok(race("race-9", "R1", 0, "R2", 0, None)));

        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.select_entity("R1");
        machine.select_entity("R2");
        machine.apply_remote(SessionMessage::UpdateProgress {
            entity_id: "old".into(),
            progress: RocketProgress::new(70, false),
        });

        let started = machine.start_race(&transport).await.unwrap();
        assert_eq!(started.map(|r| r.id), Some("race-9".to_string()));
        assert_eq!(machine.active_race_id(), Some("race-9"));
        assert_eq!(machine.phase(), RacePhase::Racing);
        assert_eq!(machine.progress_of("R1"), Some(RocketProgress::new(0, false)));
        assert_eq!(machine.progress_of("R2"), Some(RocketProgress::new(0, false)));
        assert_eq!(machine.progress_of("old"), None);
        assert!(machine.state().race_started_at.is_some());
    }

    #[tokio::test]
    async fn start_race_failure_leaves_state_untouched() {
        let transport = ScriptedTransport::default();
        transport.push_start(Err(TransportError::Status(503)));

        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.select_entity("R1");
        machine.select_entity("R2");
        machine.take_changes();
        let before = machine.state().clone();

        let err = machine.start_race(&transport).await.unwrap_err();
        assert_eq!(err, TransportError::Status(503));
        assert_eq!(machine.state(), &before);
        assert!(machine.take_changes().is_empty());
    }

    #[test]
    fn progress_ignored_when_not_racing() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        assert_eq!(machine.record_progress("R1", 50, false), ProgressOutcome::Ignored);
        assert!(machine.progress_of("R1").is_none());
    }

    #[test]
    fn progress_overwrites_previous_value() {
        let mut machine = racing_machine(CompletionPolicy::default());
        machine.record_progress("R1", 30, false);
        machine.record_progress("R1", 20, false);
        assert_eq!(machine.progress_of("R1"), Some(RocketProgress::new(20, false)));
    }

    #[test]
    fn first_to_finish_completes_on_one_rocket() {
        let mut machine = racing_machine(CompletionPolicy::FirstToFinish);
        assert_eq!(machine.record_progress("R2", 35, false), ProgressOutcome::Updated);
        assert_eq!(machine.record_progress("R1", 100, false), ProgressOutcome::Finished);
        assert_eq!(machine.reconcile_status(), ReconcileStatus::Scheduled);
        // Still racing during the debounce so late events land.
        assert_eq!(machine.phase(), RacePhase::Racing);
        assert_eq!(machine.record_progress("R2", 41, false), ProgressOutcome::Updated);
        assert_eq!(machine.progress_of("R2"), Some(RocketProgress::new(41, false)));
    }

    #[test]
    fn explosion_counts_as_finished() {
        let mut machine = racing_machine(CompletionPolicy::FirstToFinish);
        assert_eq!(machine.record_progress("R2", 12, true), ProgressOutcome::Finished);
    }

    #[test]
    fn all_finished_waits_for_every_rocket() {
        let mut machine = racing_machine(CompletionPolicy::AllFinished);
        assert_eq!(machine.record_progress("R1", 100, false), ProgressOutcome::Updated);
        assert_eq!(machine.record_progress("R2", 64, true), ProgressOutcome::Finished);
    }

    #[test]
    fn reconcile_lifecycle_reaches_stuck() {
        let mut machine = racing_machine(CompletionPolicy::FirstToFinish);
        machine.record_progress("R1", 100, false);

        assert!(!machine.begin_reconcile("race-other"));
        assert!(machine.begin_reconcile("race-9"));
        assert_eq!(machine.phase(), RacePhase::Reconciling);
        assert_eq!(machine.record_progress("R2", 90, false), ProgressOutcome::Ignored);

        assert!(machine.reconcile_exhausted("race-9"));
        assert_eq!(machine.phase(), RacePhase::Stuck);
        assert_eq!(machine.active_race_id(), Some("race-9"));

        assert_eq!(machine.retry_reconcile(), Some("race-9".to_string()));
        assert_eq!(machine.phase(), RacePhase::Reconciling);
    }

    #[test]
    fn complete_reconcile_archives_and_returns_to_idle() {
        let mut machine = racing_machine(CompletionPolicy::FirstToFinish);
        machine.record_progress("R1", 100, false);
        machine.begin_reconcile("race-9");

        let outcome = machine.complete_reconcile("race-9", race("race-9", "R1", 100, "R2", 40, Some("R1")));
        let ArchiveOutcome::Archived(record) = outcome else {
            panic!("expected Archived, got {outcome:?}");
        };
        assert_eq!(record.winner.as_deref(), Some("R1"));
        assert!(record.started_at.is_some());
        assert_eq!(machine.finished_races().len(), 1);
        assert!(machine.active_race_id().is_none());
        assert!(machine.selected().is_empty());
        assert!(machine.state().rocket_progress.is_empty());
        assert_eq!(machine.phase(), RacePhase::Idle);
    }

    #[test]
    fn stale_result_is_discarded_after_abandon() {
        let mut machine = racing_machine(CompletionPolicy::FirstToFinish);
        machine.record_progress("R1", 100, false);
        machine.begin_reconcile("race-9");
        assert!(machine.abandon());
        assert_eq!(machine.phase(), RacePhase::Idle);

        let outcome = machine.complete_reconcile("race-9", race("race-9", "R1", 100, "R2", 40, Some("R1")));
        assert_eq!(outcome, ArchiveOutcome::Stale);
        assert!(machine.finished_races().is_empty());
    }

    #[test]
    fn abandon_without_race_is_noop() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.select_entity("A");
        machine.take_changes();
        assert!(!machine.abandon());
        assert_eq!(machine.selected(), ["A"]);
        assert!(machine.take_changes().is_empty());
    }

    #[test]
    fn archive_twice_keeps_one_entry() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        assert!(machine.archive_race(finished_record("race-1")));
        assert!(!machine.archive_race(finished_record("race-1")));
        assert_eq!(machine.finished_races().len(), 1);
    }

    #[test]
    fn history_capacity_evicts_oldest() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        for i in 1..=11 {
            machine.archive_race(finished_record(&format!("race-{i}")));
        }
        let ids: Vec<&str> = machine.finished_races().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), HISTORY_CAPACITY);
        assert_eq!(ids[0], "race-11");
        assert!(!ids.contains(&"race-1"));
    }

    #[test]
    fn remote_changes_are_tagged_remote() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.apply_remote(SessionMessage::SetSelectedEntities {
            entity_ids: vec!["A".into(), "B".into()],
        });
        machine.apply_remote(SessionMessage::SetActiveRace {
            race_id: Some("race-1".into()),
        });
        let changes = machine.take_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.origin == Origin::Remote));
        assert_eq!(machine.phase(), RacePhase::Racing);
    }

    #[test]
    fn remote_finished_race_is_deduplicated() {
        let mut machine = SessionMachine::new(CompletionPolicy::default());
        machine.archive_race(finished_record("race-1"));
        machine.take_changes();

        machine.apply_remote(SessionMessage::AddFinishedRace {
            record: finished_record("race-1"),
        });
        assert_eq!(machine.finished_races().len(), 1);
        assert!(machine.take_changes().is_empty());
    }

    #[test]
    fn remote_race_clear_resets_reconcile() {
        let mut machine = racing_machine(CompletionPolicy::FirstToFinish);
        machine.record_progress("R1", 100, false);
        assert_eq!(machine.reconcile_status(), ReconcileStatus::Scheduled);

        machine.apply_remote(SessionMessage::SetActiveRace { race_id: None });
        assert_eq!(machine.reconcile_status(), ReconcileStatus::NotStarted);
        assert!(!machine.begin_reconcile("race-9"));
    }

    #[test]
    fn restore_rechecks_completion() {
        let mut state = SessionState {
            selected_rockets: vec!["R1".into(), "R2".into()],
            active_race_id: Some("race-3".into()),
            ..Default::default()
        };
        state
            .rocket_progress
            .insert("R2".into(), RocketProgress::new(0, true));

        let mut machine = SessionMachine::restore(state, CompletionPolicy::FirstToFinish);
        assert_eq!(machine.phase(), RacePhase::Racing);
        assert!(machine.check_completion());
        assert!(!machine.check_completion(), "only schedules once");
    }

    #[test]
    fn restored_stuck_race_waits_for_retry() {
        let mut state = SessionState {
            selected_rockets: vec!["R1".into(), "R2".into()],
            active_race_id: Some("race-3".into()),
            ..Default::default()
        };
        state
            .rocket_progress
            .insert("R1".into(), RocketProgress::new(100, false));

        let mut machine = SessionMachine::restore(state, CompletionPolicy::FirstToFinish);
        assert!(!machine.restore_exhausted("race-old"));
        assert!(machine.restore_exhausted("race-3"));
        assert_eq!(machine.phase(), RacePhase::Stuck);
        assert_eq!(machine.stuck_race_id(), Some("race-3"));
        assert!(!machine.check_completion());

        assert_eq!(machine.retry_reconcile().as_deref(), Some("race-3"));
        assert_eq!(machine.stuck_race_id(), None);
    }

    #[test]
    fn double_explosion_archives_without_winner() {
        let mut machine = racing_machine(CompletionPolicy::AllFinished);
        machine.record_progress("R1", 30, true);
        machine.record_progress("R2", 55, true);
        machine.begin_reconcile("race-9");
        let exploded = Race {
            id: "race-9".into(),
            rocket1: RaceParticipant { id: "R1".into(), progress: 30, exploded: true },
            rocket2: RaceParticipant { id: "R2".into(), progress: 55, exploded: true },
            winner: None,
        };
        let ArchiveOutcome::Archived(record) = machine.complete_reconcile("race-9", exploded) else {
            panic!("expected archive");
        };
        assert_eq!(record.outcome(), crate::model::RaceOutcome::BothExploded);
    }
}
