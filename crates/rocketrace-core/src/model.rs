// Race records: rockets, live progress, authoritative races, finished history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress value at which a rocket has completed the race.
pub const MAX_PROGRESS: u8 = 100;

/// Display name used when a rocket id is missing from the catalog.
pub const UNKNOWN_ROCKET_NAME: &str = "Unknown rocket";

// ---------------------------------------------------------------------------
// Rockets
// ---------------------------------------------------------------------------

/// A racer the user can select. Static display data sourced from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rocket {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
}

/// The rocket list as last fetched from the server.
#[derive(Debug, Clone, Default)]
pub struct RocketCatalog {
    rockets: Vec<Rocket>,
}

impl RocketCatalog {
    pub fn new(rockets: Vec<Rocket>) -> Self {
        Self { rockets }
    }

    pub fn get(&self, rocket_id: &str) -> Option<&Rocket> {
        self.rockets.iter().find(|r| r.id == rocket_id)
    }

    /// Display name for `rocket_id`, falling back to [`UNKNOWN_ROCKET_NAME`].
    pub fn name_of(&self, rocket_id: &str) -> &str {
        self.get(rocket_id)
            .map(|r| r.name.as_str())
            .unwrap_or(UNKNOWN_ROCKET_NAME)
    }
}

// ---------------------------------------------------------------------------
// Live progress
// ---------------------------------------------------------------------------

/// Last-known progress of one rocket in the active race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RocketProgress {
    pub progress: u8,
    pub exploded: bool,
}

impl RocketProgress {
    /// Build a record, clamping `progress` into `0..=100`.
    pub fn new(progress: u8, exploded: bool) -> Self {
        Self {
            progress: progress.min(MAX_PROGRESS),
            exploded,
        }
    }

    /// Reached the finish line or blew up.
    pub fn is_finished(&self) -> bool {
        self.progress >= MAX_PROGRESS || self.exploded
    }

    /// Crossed the finish line intact.
    pub fn is_winning(&self) -> bool {
        self.progress >= MAX_PROGRESS && !self.exploded
    }
}

/// One event pushed by the progress subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub race_id: String,
    pub rocket_id: String,
    pub progress: u8,
    pub exploded: bool,
}

// ---------------------------------------------------------------------------
// Authoritative race records
// ---------------------------------------------------------------------------

/// A rocket's standing inside a race record returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceParticipant {
    pub id: String,
    pub progress: u8,
    pub exploded: bool,
}

/// A race as reported by the server. `winner` is absent while the race is
/// still running and for a double elimination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Race {
    pub id: String,
    pub rocket1: RaceParticipant,
    pub rocket2: RaceParticipant,
    #[serde(default)]
    pub winner: Option<String>,
}

impl Race {
    pub fn outcome(&self) -> RaceOutcome {
        RaceOutcome::classify(&self.rocket1, &self.rocket2, self.winner.as_deref())
    }
}

/// How a race ended, as far as the record tells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome {
    Winner(String),
    BothExploded,
    Undecided,
}

impl RaceOutcome {
    fn classify(rocket1: &RaceParticipant, rocket2: &RaceParticipant, winner: Option<&str>) -> Self {
        if rocket1.exploded && rocket2.exploded {
            return RaceOutcome::BothExploded;
        }
        match winner {
            Some(id) if !id.is_empty() => RaceOutcome::Winner(id.to_string()),
            _ => RaceOutcome::Undecided,
        }
    }
}

// ---------------------------------------------------------------------------
// Finished history
// ---------------------------------------------------------------------------

/// An archived race in the session's finished history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedRace {
    pub id: String,
    #[serde(default)]
    pub winner: Option<String>,
    pub rocket1: RaceParticipant,
    pub rocket2: RaceParticipant,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl FinishedRace {
    /// Archive an authoritative race record.
    pub fn from_race(race: Race, started_at: Option<DateTime<Utc>>, finished_at: DateTime<Utc>) -> Self {
        Self {
            id: race.id,
            winner: race.winner.filter(|w| !w.is_empty()),
            rocket1: race.rocket1,
            rocket2: race.rocket2,
            started_at,
            finished_at,
        }
    }

    /// Rocket ids in race order.
    pub fn participants(&self) -> [&str; 2] {
        [self.rocket1.id.as_str(), self.rocket2.id.as_str()]
    }

    pub fn outcome(&self) -> RaceOutcome {
        RaceOutcome::classify(&self.rocket1, &self.rocket2, self.winner.as_deref())
    }

    /// Wall time between race start and archival, when the start is known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.started_at.map(|start| self.finished_at - start)
    }

    /// Last four characters of the race id, for compact labels.
    pub fn short_id(&self) -> &str {
        let start = self
            .id
            .char_indices()
            .rev()
            .nth(3)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        &self.id[start..]
    }
}
