// Mutation vocabulary shared by the session machine and the cross-tab channel.

use serde::{Deserialize, Serialize};

use crate::model::{FinishedRace, RocketProgress};

/// One state mutation. Serialized as `{"type": ..., "payload": {...}}`.
///
/// Every variant is safe to apply twice except `AddFinishedRace`, which the
/// machine deduplicates by race id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum SessionMessage {
    SetActiveRace { race_id: Option<String> },
    AddFinishedRace { record: FinishedRace },
    SetSelectedEntities { entity_ids: Vec<String> },
    UpdateProgress { entity_id: String, progress: RocketProgress },
    ClearProgress {},
}

impl SessionMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::SetActiveRace { .. } => "SET_ACTIVE_RACE",
            SessionMessage::AddFinishedRace { .. } => "ADD_FINISHED_RACE",
            SessionMessage::SetSelectedEntities { .. } => "SET_SELECTED_ENTITIES",
            SessionMessage::UpdateProgress { .. } => "UPDATE_PROGRESS",
            SessionMessage::ClearProgress {} => "CLEAR_PROGRESS",
        }
    }
}

/// Where a mutation came from. Only `Local` changes leave the tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// User action or this tab's own feed delivery.
    Local,
    /// Applied from a sibling tab.
    Remote,
}

/// A mutation the machine has applied, tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub origin: Origin,
    pub message: SessionMessage,
}
