// Bounded retry loop for fetching a race's authoritative result.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Race;
use crate::transport::{FetchPolicy, RaceTransport};

/// How many times to ask, how long to wait in between, and whether to skip
/// the client cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub bypass_cache: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(500),
            bypass_cache: true,
        }
    }
}

impl RetryPolicy {
    pub fn fetch_policy(&self) -> FetchPolicy {
        if self.bypass_cache {
            FetchPolicy::NetworkOnly
        } else {
            FetchPolicy::CacheFirst
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("no result after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Call `attempt` until it yields `Some`, up to `policy.max_attempts` times,
/// sleeping `policy.delay` between attempts. Errors count as failed attempts.
/// The attempt number passed in starts at 1.
pub async fn poll_until<T, E, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T, PollError>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for n in 1..=policy.max_attempts {
        match attempt(n).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!(attempt = n, "poll attempt returned no result"),
            Err(e) => warn!(attempt = n, "poll attempt failed: {e}"),
        }
        if n < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }
    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
    })
}

/// Poll the server until it returns a record for `race_id`. Any record counts,
/// including one without a winner yet.
pub async fn fetch_race_result<T>(transport: &T, race_id: &str, policy: &RetryPolicy) -> Result<Race, PollError>
where
    T: RaceTransport + ?Sized,
{
    let fetch = policy.fetch_policy();
    poll_until(policy, |_| async move {
        let race = transport.get_race(race_id, fetch).await?;
        Ok::<_, crate::transport::TransportError>(race)
    })
    .await
}
