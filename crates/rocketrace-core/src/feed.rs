// Progress feed adapter: one subscription per tracked rocket of the active race.
//
// The adapter only forwards. It never touches session state; the owner of the
// receiving end decides what to do with each event.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::ProgressEvent;
use crate::transport::{RaceTransport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Progress(ProgressEvent),
    /// Subscribing failed or the stream yielded an error. The subscription
    /// for this rocket is gone; the session keeps its last known progress.
    Failed {
        race_id: String,
        rocket_id: String,
        message: String,
    },
    /// The server completed the stream, or closed the socket after it had
    /// delivered progress.
    Ended { race_id: String, rocket_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FeedKey {
    race_id: String,
    rockets: Vec<String>,
}

pub struct FeedAdapter {
    transport: Arc<dyn RaceTransport>,
    tx: mpsc::Sender<FeedEvent>,
    current: Option<FeedKey>,
    tasks: Vec<JoinHandle<()>>,
}

impl FeedAdapter {
    pub fn new(transport: Arc<dyn RaceTransport>, tx: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            transport,
            tx,
            current: None,
            tasks: Vec::new(),
        }
    }

    /// Align subscriptions with the given active race and tracked rockets.
    /// Existing subscriptions are kept when nothing changed; otherwise they are
    /// torn down before any new ones open. Returns `true` when subscriptions
    /// were changed.
    pub fn sync(&mut self, race_id: Option<&str>, rockets: &[String]) -> bool {
        let wanted = race_id
            .filter(|_| !rockets.is_empty())
            .map(|race_id| FeedKey {
                race_id: race_id.to_string(),
                rockets: rockets.to_vec(),
            });
        if wanted == self.current {
            return false;
        }

        self.teardown();

        if let Some(key) = wanted {
            info!(race_id = %key.race_id, rockets = ?key.rockets, "Subscribing to progress feed");
            for rocket_id in &key.rockets {
                self.tasks.push(tokio::spawn(pump(
                    Arc::clone(&self.transport),
                    self.tx.clone(),
                    key.race_id.clone(),
                    rocket_id.clone(),
                )));
            }
            self.current = Some(key);
        }
        true
    }

    pub fn is_subscribed(&self) -> bool {
        self.current.is_some()
    }

    pub fn teardown(&mut self) {
        if let Some(key) = self.current.take() {
            debug!(race_id = %key.race_id, "closing progress subscriptions");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for FeedAdapter {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn pump(
    transport: Arc<dyn RaceTransport>,
    tx: mpsc::Sender<FeedEvent>,
    race_id: String,
    rocket_id: String,
) {
    let mut stream = match transport.subscribe_progress(&race_id, &rocket_id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%race_id, %rocket_id, "Progress subscription failed: {e}");
            let _ = tx
                .send(FeedEvent::Failed {
                    race_id,
                    rocket_id,
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };

    let mut delivered = false;
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => FeedEvent::Progress(event),
            Err(TransportError::Closed) if delivered => break,
            Err(e) => {
                warn!(%race_id, %rocket_id, "Progress feed error: {e}");
                let _ = tx
                    .send(FeedEvent::Failed {
                        race_id: race_id.clone(),
                        rocket_id: rocket_id.clone(),
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        if tx.send(event).await.is_err() {
            debug!("feed receiver dropped");
            return;
        }
        delivered = true;
    }

    debug!(%race_id, %rocket_id, "progress feed ended");
    let _ = tx.send(FeedEvent::Ended { race_id, rocket_id }).await;
}
