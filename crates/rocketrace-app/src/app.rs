// Application state and orchestration logic.
//
// The central event loop that coordinates user commands, progress feed
// events, reconciliation timers and pollers, and messages from sibling tabs.
// Every mutation goes through the session machine; after each handler the
// resulting changes are replicated, persisted and pushed to the front end.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rocketrace_core::config::Config;
use rocketrace_core::db::Database;
use rocketrace_core::feed::{FeedAdapter, FeedEvent};
use rocketrace_core::model::{FinishedRace, Race, RaceOutcome, RocketCatalog};
use rocketrace_core::poll::{fetch_race_result, PollError};
use rocketrace_core::replicator::Replicator;
use rocketrace_core::session::{ArchiveOutcome, ProgressOutcome, ReconcileStatus, SessionMachine, SessionMessage};
use rocketrace_core::transport::RaceTransport;

use crate::protocol::{AppSnapshot, HistoryEntry, RocketView, UiUpdate, UserCommand};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Timer and poller results, tagged with the race they were started for.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileEvent {
    DebounceElapsed { race_id: String },
    Resolved { race_id: String, race: Race },
    Exhausted { race_id: String, attempts: u32 },
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub config: Config,
    pub machine: SessionMachine,
    pub catalog: RocketCatalog,
    pub db: Arc<Database>,
    transport: Arc<dyn RaceTransport>,
    feed: FeedAdapter,
    replicator: Replicator,
    /// Pending debounce before reconciliation; aborted when the race ends.
    debounce_task: Option<JoinHandle<()>>,
    /// Spawned timers and pollers report back through this sender.
    reconcile_tx: mpsc::Sender<ReconcileEvent>,
    /// Stuck race id as last written to the database.
    saved_stuck: Option<String>,
}

impl AppState {
    pub fn new(
        config: Config,
        machine: SessionMachine,
        db: Arc<Database>,
        transport: Arc<dyn RaceTransport>,
        feed_tx: mpsc::Sender<FeedEvent>,
        replicator: Replicator,
        reconcile_tx: mpsc::Sender<ReconcileEvent>,
    ) -> Self {
        let feed = FeedAdapter::new(Arc::clone(&transport), feed_tx);
        let saved_stuck = machine.stuck_race_id().map(String::from);
        Self {
            config,
            machine,
            catalog: RocketCatalog::default(),
            db,
            transport,
            feed,
            replicator,
            debounce_task: None,
            reconcile_tx,
            saved_stuck,
        }
    }

    pub fn has_pending_debounce(&self) -> bool {
        self.debounce_task.is_some()
    }

    /// Pick up a restored session: reopen the feed and reschedule
    /// reconciliation if the race already finished before the restart.
    pub async fn resume(&mut self, ui_tx: &mpsc::Sender<UiUpdate>) {
        if let Some(race_id) = self.machine.active_race_id().map(String::from) {
            info!(%race_id, phase = ?self.machine.phase(), "Resuming saved race");
            if self.machine.check_completion() {
                self.schedule_debounce(race_id);
            }
        }
        self.commit(ui_tx).await;
    }

    /// Replicate and persist pending changes, align the feed with the
    /// session, and push a fresh snapshot.
    async fn commit(&mut self, ui_tx: &mpsc::Sender<UiUpdate>) {
        let changes = self.machine.take_changes();
        if !changes.is_empty() {
            let posted = self.replicator.publish(&changes);
            debug!(changes = changes.len(), posted, "committing session changes");

            let namespace = &self.config.storage.namespace;
            if let Err(e) = self.db.save_session(namespace, self.machine.state()) {
                warn!("Failed to persist session: {e:#}");
            }
        }

        let stuck = self.machine.stuck_race_id().map(String::from);
        if stuck != self.saved_stuck {
            let namespace = &self.config.storage.namespace;
            if let Err(e) = self.db.save_stuck_race(namespace, stuck.as_deref()) {
                warn!("Failed to persist stuck race: {e:#}");
            }
            self.saved_stuck = stuck;
        }

        if self.machine.reconcile_status() != ReconcileStatus::Scheduled {
            if let Some(task) = self.debounce_task.take() {
                debug!("cancelling reconcile debounce");
                task.abort();
            }
        }

        self.feed
            .sync(self.machine.active_race_id(), self.machine.selected());

        let _ = ui_tx
            .send(UiUpdate::Snapshot(Box::new(self.build_snapshot())))
            .await;
    }

    fn schedule_debounce(&mut self, race_id: String) {
        if let Some(task) = self.debounce_task.take() {
            task.abort();
        }
        let delay = self.config.race.debounce();
        let tx = self.reconcile_tx.clone();
        debug!(%race_id, ?delay, "scheduling reconcile");
        self.debounce_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ReconcileEvent::DebounceElapsed { race_id }).await;
        }));
    }

    fn spawn_poll(&self, race_id: String) {
        let transport = Arc::clone(&self.transport);
        let policy = self.config.reconcile.retry_policy();
        let tx = self.reconcile_tx.clone();
        info!(%race_id, attempts = policy.max_attempts, "Fetching race result");
        tokio::spawn(async move {
            let event = match fetch_race_result(transport.as_ref(), &race_id, &policy).await {
                Ok(race) => ReconcileEvent::Resolved { race_id, race },
                Err(PollError::Exhausted { attempts }) => ReconcileEvent::Exhausted { race_id, attempts },
            };
            let _ = tx.send(event).await;
        });
    }

    pub fn build_snapshot(&self) -> AppSnapshot {
        let selected = self
            .machine
            .selected()
            .iter()
            .map(|id| {
                let progress = self.machine.progress_of(id);
                RocketView {
                    id: id.clone(),
                    name: self.catalog.name_of(id).to_string(),
                    winning: progress.is_some_and(|p| p.is_winning()),
                    progress,
                }
            })
            .collect();

        let history = self
            .machine
            .finished_races()
            .iter()
            .map(|record| HistoryEntry {
                label: format!("Race #{}", record.short_id()),
                summary: self.describe_outcome(record),
                record: record.clone(),
            })
            .collect();

        AppSnapshot {
            phase: self.machine.phase(),
            active_race_id: self.machine.active_race_id().map(String::from),
            selected,
            history,
        }
    }

    fn describe_outcome(&self, record: &FinishedRace) -> String {
        match record.outcome() {
            RaceOutcome::BothExploded => "Both rockets exploded".to_string(),
            RaceOutcome::Winner(id) => format!("{} wins", self.catalog.name_of(&id)),
            RaceOutcome::Undecided => "Race in progress".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the event loop until the user quits or the command channel closes.
pub async fn run(
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    mut feed_rx: mpsc::Receiver<FeedEvent>,
    mut reconcile_rx: mpsc::Receiver<ReconcileEvent>,
    mut sync_rx: mpsc::Receiver<SessionMessage>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");
    state.resume(&ui_tx).await;

    // When the sync channel closes (or replication is disabled) stop polling
    // it so select! never spins on a closed receiver.
    let mut sync_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => handle_user_command(&mut state, cmd, &ui_tx).await,
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            Some(event) = feed_rx.recv() => {
                handle_feed_event(&mut state, event, &ui_tx).await;
            }

            Some(event) = reconcile_rx.recv() => {
                handle_reconcile_event(&mut state, event, &ui_tx).await;
            }

            message = sync_rx.recv(), if sync_open => {
                match message {
                    Some(message) => handle_remote_message(&mut state, message, &ui_tx).await,
                    None => {
                        debug!("sync channel closed");
                        sync_open = false;
                    }
                }
            }
        }
    }

    state.feed.teardown();
    if let Some(task) = state.debounce_task.take() {
        task.abort();
    }
    Ok(())
}

pub async fn handle_user_command(state: &mut AppState, cmd: UserCommand, ui_tx: &mpsc::Sender<UiUpdate>) {
    match cmd {
        UserCommand::LoadRockets => {
            match state.transport.list_rockets().await {
                Ok(rockets) => {
                    info!(count = rockets.len(), "Rockets loaded");
                    state.catalog = RocketCatalog::new(rockets.clone());
                    let _ = ui_tx.send(UiUpdate::Rockets(rockets)).await;
                }
                Err(e) => {
                    warn!("Failed to load rockets: {e}");
                    let _ = ui_tx.send(UiUpdate::RocketsFailed(e.to_string())).await;
                }
            }
        }
        UserCommand::Select(rocket_id) => {
            if !state.machine.select_entity(&rocket_id) {
                let _ = ui_tx
                    .send(UiUpdate::Notice("Selection is locked while a race is active".into()))
                    .await;
            }
        }
        UserCommand::StartRace => {
            let transport = Arc::clone(&state.transport);
            match state.machine.start_race(transport.as_ref()).await {
                Ok(Some(race)) => {
                    let _ = ui_tx
                        .send(UiUpdate::Notice(format!("Race {} started", race.id)))
                        .await;
                }
                Ok(None) => {
                    let _ = ui_tx
                        .send(UiUpdate::Notice(
                            "Select exactly two rockets, with no race running, to start".into(),
                        ))
                        .await;
                }
                Err(e) => {
                    warn!("Failed to start race: {e}");
                    let _ = ui_tx.send(UiUpdate::RaceStartFailed(e.to_string())).await;
                }
            }
        }
        UserCommand::Abandon => {
            if !state.machine.abandon() {
                let _ = ui_tx.send(UiUpdate::Notice("No race to abandon".into())).await;
            }
        }
        UserCommand::RetryResult => match state.machine.retry_reconcile() {
            Some(race_id) => state.spawn_poll(race_id),
            None => {
                let _ = ui_tx
                    .send(UiUpdate::Notice("Nothing to retry: no stuck race".into()))
                    .await;
            }
        },
        UserCommand::Quit => {}
    }
    state.commit(ui_tx).await;
}

pub async fn handle_feed_event(state: &mut AppState, event: FeedEvent, ui_tx: &mpsc::Sender<UiUpdate>) {
    match event {
        FeedEvent::Progress(event) => {
            if state.machine.active_race_id() != Some(event.race_id.as_str()) {
                debug!(race_id = %event.race_id, "dropping progress for inactive race");
                return;
            }
            let outcome = state
                .machine
                .record_progress(&event.rocket_id, event.progress, event.exploded);
            if outcome == ProgressOutcome::Finished {
                state.schedule_debounce(event.race_id);
            }
            state.commit(ui_tx).await;
        }
        FeedEvent::Failed {
            race_id,
            rocket_id,
            message,
        } => {
            if state.machine.active_race_id() == Some(race_id.as_str()) {
                let _ = ui_tx.send(UiUpdate::FeedError { rocket_id, message }).await;
            }
        }
        FeedEvent::Ended { race_id, rocket_id } => {
            debug!(%race_id, %rocket_id, "progress feed completed");
        }
    }
}

pub async fn handle_reconcile_event(state: &mut AppState, event: ReconcileEvent, ui_tx: &mpsc::Sender<UiUpdate>) {
    match event {
        ReconcileEvent::DebounceElapsed { race_id } => {
            state.debounce_task = None;
            if state.machine.begin_reconcile(&race_id) {
                state.spawn_poll(race_id);
            }
        }
        ReconcileEvent::Resolved { race_id, race } => match state.machine.complete_reconcile(&race_id, race) {
            ArchiveOutcome::Archived(record) => {
                let _ = ui_tx.send(UiUpdate::RaceFinished(record)).await;
            }
            ArchiveOutcome::Duplicate => debug!(%race_id, "race was archived elsewhere"),
            ArchiveOutcome::Stale => debug!(%race_id, "stale race result discarded"),
        },
        ReconcileEvent::Exhausted { race_id, attempts } => {
            if state.machine.reconcile_exhausted(&race_id) {
                let _ = ui_tx.send(UiUpdate::ReconcileFailed { race_id, attempts }).await;
            }
        }
    }
    state.commit(ui_tx).await;
}

pub async fn handle_remote_message(state: &mut AppState, message: SessionMessage, ui_tx: &mpsc::Sender<UiUpdate>) {
    state.machine.apply_remote(message);
    state.commit(ui_tx).await;
}
