// GraphQL client for the race server.
//
// Queries and mutations go over HTTP POST; progress subscriptions go over a
// graphql-transport-ws WebSocket (see `graphql_ws`).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use rocketrace_core::model::{Race, Rocket};
use rocketrace_core::transport::{FetchPolicy, ProgressStream, RaceTransport, TransportError};

use crate::graphql_ws;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

const ROCKETS_QUERY: &str = "query { rockets { id name description image } }";

const START_RACE_MUTATION: &str = "mutation ($rocket1: ID!, $rocket2: ID!) { \
     startRace(rocket1: $rocket1, rocket2: $rocket2) { \
     id rocket1 { id progress exploded } rocket2 { id progress exploded } winner } }";

const RACE_QUERY: &str = "query ($id: ID!) { race(id: $id) { \
     id rocket1 { id progress exploded } rocket2 { id progress exploded } winner } }";

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

/// Standard GraphQL response: `data` and/or a list of errors.
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlErrorItem {
    pub message: String,
}

impl<T> GraphqlResponse<T> {
    /// Any reported error wins over partial data.
    pub fn into_result(self) -> Result<T, TransportError> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(TransportError::GraphQl(messages.join("; ")));
        }
        self.data
            .ok_or_else(|| TransportError::Decode("response has neither data nor errors".into()))
    }
}

#[derive(Debug, Deserialize)]
struct RocketsData {
    rockets: Vec<Rocket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRaceData {
    start_race: Race,
}

#[derive(Debug, Deserialize)]
struct RaceData {
    race: Option<Race>,
}

// ---------------------------------------------------------------------------
// GraphqlClient
// ---------------------------------------------------------------------------

pub struct GraphqlClient {
    http: reqwest::Client,
    http_url: String,
    ws_url: String,
    /// Last `race(id)` response per race id.
    race_cache: Mutex<HashMap<String, Race>>,
}

impl GraphqlClient {
    pub fn new(http_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            http_url: http_url.into(),
            ws_url: ws_url.into(),
            race_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, TransportError> {
        let body = json!({ "query": query, "variables": variables });
        let response = self
            .http
            .post(&self.http_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let parsed: GraphqlResponse<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        parsed.into_result()
    }

    fn cached_race(&self, race_id: &str) -> Option<Race> {
        self.race_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(race_id).cloned())
    }

    fn store_race(&self, race: &Race) {
        if let Ok(mut cache) = self.race_cache.lock() {
            cache.insert(race.id.clone(), race.clone());
        }
    }
}

#[async_trait]
impl RaceTransport for GraphqlClient {
    async fn list_rockets(&self) -> Result<Vec<Rocket>, TransportError> {
        let data: RocketsData = self.execute(ROCKETS_QUERY, json!({})).await?;
        debug!(count = data.rockets.len(), "fetched rockets");
        Ok(data.rockets)
    }

    async fn start_race(&self, rocket1: &str, rocket2: &str) -> Result<Race, TransportError> {
        let data: StartRaceData = self
            .execute(START_RACE_MUTATION, json!({ "rocket1": rocket1, "rocket2": rocket2 }))
            .await?;
        Ok(data.start_race)
    }

    async fn get_race(&self, race_id: &str, fetch: FetchPolicy) -> Result<Option<Race>, TransportError> {
        if fetch == FetchPolicy::CacheFirst {
            if let Some(race) = self.cached_race(race_id) {
                debug!(race_id, "race served from cache");
                return Ok(Some(race));
            }
        }
        let data: RaceData = self.execute(RACE_QUERY, json!({ "id": race_id })).await?;
        if let Some(race) = &data.race {
            self.store_race(race);
        }
        Ok(data.race)
    }

    async fn subscribe_progress(&self, race_id: &str, rocket_id: &str) -> Result<ProgressStream, TransportError> {
        graphql_ws::subscribe(&self.ws_url, race_id, rocket_id).await
    }
}
