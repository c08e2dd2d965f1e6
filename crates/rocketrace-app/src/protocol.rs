// Messages between the event loop and the console front end.

use rocketrace_core::model::{FinishedRace, Rocket, RocketProgress};
use rocketrace_core::session::RacePhase;

/// Commands sent from the front end to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    LoadRockets,
    Select(String),
    StartRace,
    Abandon,
    /// Re-poll the result of a stuck race.
    RetryResult,
    Quit,
}

/// Updates pushed from the event loop to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    Rockets(Vec<Rocket>),
    RocketsFailed(String),
    Snapshot(Box<AppSnapshot>),
    RaceStartFailed(String),
    FeedError { rocket_id: String, message: String },
    RaceFinished(FinishedRace),
    ReconcileFailed { race_id: String, attempts: u32 },
    Notice(String),
}

/// Everything the front end needs to render the session.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSnapshot {
    pub phase: RacePhase,
    pub active_race_id: Option<String>,
    /// Selected rockets in selection order, with live progress while racing.
    pub selected: Vec<RocketView>,
    /// Newest first.
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RocketView {
    pub id: String,
    pub name: String,
    pub progress: Option<RocketProgress>,
    pub winning: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub label: String,
    pub summary: String,
    pub record: FinishedRace,
}
