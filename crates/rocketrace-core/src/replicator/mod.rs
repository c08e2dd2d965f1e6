// Cross-tab replication of session messages.
//
// Local changes are posted to a shared channel as frames tagged with this
// tab's id and the storage namespace. Inbound frames from other tabs are
// decoded and handed to the session owner, which applies them with
// `Origin::Remote` so they are never posted again.

pub mod local;
pub mod sqlite;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{Change, Origin, SessionMessage};

pub use local::LocalHub;
pub use sqlite::SqliteChannel;

/// One message on the wire between tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFrame {
    pub namespace: String,
    /// Tab id of the sender.
    pub origin: String,
    /// JSON-encoded `SessionMessage`.
    pub payload: String,
}

/// A broadcast medium shared by every tab on the machine.
pub trait SyncChannel: Send + Sync {
    fn post(&self, frame: SyncFrame) -> anyhow::Result<()>;

    /// Frames posted after this call, including this tab's own.
    fn subscribe(&self) -> BoxStream<'static, SyncFrame>;
}

pub struct Replicator {
    channel: Option<Arc<dyn SyncChannel>>,
    namespace: String,
    tab_id: String,
}

impl Replicator {
    pub fn new(channel: Arc<dyn SyncChannel>, namespace: impl Into<String>) -> Self {
        Self {
            channel: Some(channel),
            namespace: namespace.into(),
            tab_id: new_tab_id(),
        }
    }

    /// A replicator with no channel. Publishing and subscribing are no-ops.
    pub fn disabled(namespace: impl Into<String>) -> Self {
        Self {
            channel: None,
            namespace: namespace.into(),
            tab_id: new_tab_id(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Post every `Local` change. Returns how many frames were posted.
    pub fn publish(&self, changes: &[Change]) -> usize {
        let Some(channel) = &self.channel else {
            return 0;
        };
        let mut posted = 0;
        for change in changes.iter().filter(|c| c.origin == Origin::Local) {
            let payload = match serde_json::to_string(&change.message) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(kind = change.message.kind(), "Failed to encode sync message: {e}");
                    continue;
                }
            };
            let frame = SyncFrame {
                namespace: self.namespace.clone(),
                origin: self.tab_id.clone(),
                payload,
            };
            match channel.post(frame) {
                Ok(()) => posted += 1,
                Err(e) => warn!(kind = change.message.kind(), "Failed to post sync message: {e:#}"),
            }
        }
        posted
    }

    /// Forward messages from other tabs into `tx` until either side closes.
    ///
    /// The channel subscription is taken before this returns, so anything
    /// posted afterwards is delivered.
    pub fn spawn_inbound(&self, tx: mpsc::Sender<SessionMessage>) -> Option<JoinHandle<()>> {
        let channel = self.channel.as_ref()?;
        let mut frames = channel.subscribe();
        let namespace = self.namespace.clone();
        let tab_id = self.tab_id.clone();
        info!(%tab_id, %namespace, "Cross-tab sync enabled");

        Some(tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                let Some(message) = decode_frame(&frame, &namespace, &tab_id) else {
                    continue;
                };
                if tx.send(message).await.is_err() {
                    debug!("session receiver dropped, stopping sync inbound");
                    return;
                }
            }
            debug!("sync channel closed");
        }))
    }
}

/// Decode `frame` if it belongs to `namespace` and came from another tab.
pub fn decode_frame(frame: &SyncFrame, namespace: &str, tab_id: &str) -> Option<SessionMessage> {
    if frame.namespace != namespace || frame.origin == tab_id {
        return None;
    }
    match serde_json::from_str(&frame.payload) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(origin = %frame.origin, "Ignoring malformed sync message: {e}");
            None
        }
    }
}

fn new_tab_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "tab-{}-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_millis(),
        n
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RocketProgress;
    use std::time::Duration;

    fn local(message: SessionMessage) -> Change {
        Change {
            origin: Origin::Local,
            message,
        }
    }

    fn remote(message: SessionMessage) -> Change {
        Change {
            origin: Origin::Remote,
            message,
        }
    }

    #[test]
    fn tab_ids_are_unique() {
        let a = Replicator::disabled("race-storage");
        let b = Replicator::disabled("race-storage");
        assert_ne!(a.tab_id(), b.tab_id());
        assert!(a.tab_id().starts_with("tab-"));
    }

    #[test]
    fn disabled_replicator_posts_nothing() {
        let replicator = Replicator::disabled("race-storage");
        assert!(!replicator.is_enabled());
        assert_eq!(replicator.publish(&[local(SessionMessage::ClearProgress {})]), 0);
        let (tx, _rx) = mpsc::channel(1);
        assert!(replicator.spawn_inbound(tx).is_none());
    }

    #[tokio::test]
    async fn remote_changes_are_not_republished() {
        let hub = Arc::new(LocalHub::new(16));
        let replicator = Replicator::new(hub.clone(), "race-storage");
        let mut frames = hub.subscribe();

        let posted = replicator.publish(&[
            remote(SessionMessage::ClearProgress {}),
            local(SessionMessage::SetActiveRace { race_id: None }),
        ]);
        assert_eq!(posted, 1);

        let frame = frames.next().await.unwrap();
        assert_eq!(frame.origin, replicator.tab_id());
        assert!(frame.payload.contains("SET_ACTIVE_RACE"));
    }

    #[tokio::test]
    async fn sibling_receives_but_sender_does_not() {
        let hub = Arc::new(LocalHub::new(16));
        let tab_a = Replicator::new(hub.clone(), "race-storage");
        let tab_b = Replicator::new(hub.clone(), "race-storage");

        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        tab_a.spawn_inbound(tx_a);
        tab_b.spawn_inbound(tx_b);

        let message = SessionMessage::UpdateProgress {
            entity_id: "R1".into(),
            progress: RocketProgress::new(40, false),
        };
        tab_a.publish(&[local(message.clone())]);

        assert_eq!(rx_b.recv().await, Some(message));
        let echoed = tokio::time::timeout(Duration::from_millis(50), rx_a.recv()).await;
        assert!(echoed.is_err(), "sender must not receive its own frame");
    }

    #[test]
    fn decode_filters_namespace_origin_and_garbage() {
        let payload = serde_json::to_string(&SessionMessage::ClearProgress {}).unwrap();
        let frame = SyncFrame {
            namespace: "race-storage".into(),
            origin: "tab-a".into(),
            payload,
        };
        assert!(decode_frame(&frame, "race-storage", "tab-b").is_some());
        assert!(decode_frame(&frame, "race-storage", "tab-a").is_none());
        assert!(decode_frame(&frame, "other", "tab-b").is_none());

        let garbage = SyncFrame {
            payload: "{not json".into(),
            ..frame
        };
        assert!(decode_frame(&garbage, "race-storage", "tab-b").is_none());
    }
}
