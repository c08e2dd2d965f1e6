// Scripted transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::model::{ProgressEvent, Race, RaceParticipant, Rocket};
use crate::transport::{FetchPolicy, ProgressStream, RaceTransport, TransportError};

pub fn race(id: &str, r1: &str, p1: u8, r2: &str, p2: u8, winner: Option<&str>) -> Race {
    Race {
        id: id.into(),
        rocket1: RaceParticipant {
            id: r1.into(),
            progress: p1,
            exploded: false,
        },
        rocket2: RaceParticipant {
            id: r2.into(),
            progress: p2,
            exploded: false,
        },
        winner: winner.map(String::from),
    }
}

/// Each call pops the next scripted response. An empty `get_race` script
/// answers `Ok(None)`; an empty `start_race` script answers `Closed`.
#[derive(Default)]
pub struct ScriptedTransport {
    starts: Mutex<VecDeque<Result<Race, TransportError>>>,
    fetches: Mutex<VecDeque<Result<Option<Race>, TransportError>>>,
    feeds: Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<ProgressEvent, TransportError>>>>,
    start_calls: Mutex<u32>,
    fetch_log: Mutex<Vec<FetchPolicy>>,
    subscribe_log: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn push_start(&self, result: Result<Race, TransportError>) {
        self.starts.lock().unwrap().push_back(result);
    }

    pub fn push_fetch(&self, result: Result<Option<Race>, TransportError>) {
        self.fetches.lock().unwrap().push_back(result);
    }

    /// Register a feed for `rocket_id`; events sent on the returned sender are
    /// delivered by the next subscription to that rocket.
    pub fn feed(&self, rocket_id: &str) -> mpsc::UnboundedSender<Result<ProgressEvent, TransportError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().insert(rocket_id.to_string(), rx);
        tx
    }

    pub fn start_calls(&self) -> u32 {
        *self.start_calls.lock().unwrap()
    }

    pub fn fetch_log(&self) -> Vec<FetchPolicy> {
        self.fetch_log.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.subscribe_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RaceTransport for ScriptedTransport {
    async fn list_rockets(&self) -> Result<Vec<Rocket>, TransportError> {
        Ok(Vec::new())
    }

    async fn start_race(&self, _rocket1: &str, _rocket2: &str) -> Result<Race, TransportError> {
        *self.start_calls.lock().unwrap() += 1;
        self.starts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Closed))
    }

    async fn get_race(&self, _race_id: &str, fetch: FetchPolicy) -> Result<Option<Race>, TransportError> {
        self.fetch_log.lock().unwrap().push(fetch);
        self.fetches.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn subscribe_progress(
        &self,
        race_id: &str,
        rocket_id: &str,
    ) -> Result<ProgressStream, TransportError> {
        self.subscribe_log
            .lock()
            .unwrap()
            .push((race_id.to_string(), rocket_id.to_string()));
        let rx = self.feeds.lock().unwrap().remove(rocket_id);
        match rx {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}
