// The race service seen from the client: list, start, fetch, subscribe.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::model::{ProgressEvent, Race, Rocket};

/// Push stream of progress events for one (race, rocket) subscription.
/// Dropping the stream unsubscribes.
pub type ProgressStream = BoxStream<'static, Result<ProgressEvent, TransportError>>;

/// Whether a fetch may be answered from a client-side cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    #[default]
    CacheFirst,
    /// Always hit the server; the response still refreshes the cache.
    NetworkOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("connection closed by server")]
    Closed,
}

/// Client side of the race service.
#[async_trait]
pub trait RaceTransport: Send + Sync {
    async fn list_rockets(&self) -> Result<Vec<Rocket>, TransportError>;

    /// Start a race between two rockets. Not idempotent: callers must not
    /// retry blindly.
    async fn start_race(&self, rocket1: &str, rocket2: &str) -> Result<Race, TransportError>;

    /// Fetch a race by id. `Ok(None)` means the server has no
    /// record for it (yet).
    async fn get_race(&self, race_id: &str, fetch: FetchPolicy) -> Result<Option<Race>, TransportError>;

    async fn subscribe_progress(
        &self,
        race_id: &str,
        rocket_id: &str,
    ) -> Result<ProgressStream, TransportError>;
}
