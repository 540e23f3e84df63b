//! Connection retry policy.
//!
//! The only retry in the system: establishing a store connection. Batch
//! writes are never retried; a failed batch fails its step.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ============================================================================
// RetryPolicy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// `delay * attempt` before retry number `attempt`.
    Linear,
}

/// Bounded retry for connection handshakes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    /// Give up once waiting would cross this much total time.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(2),
            backoff: Backoff::Fixed,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay, ..Self::default() }
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt.max(1)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry attempts must be at least 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Time source for retry waits.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);

    /// Time since the clock was created.
    fn elapsed(&self) -> Duration;
}

/// Wall clock backed by the tokio timer.
pub struct TokioClock {
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self { start: tokio::time::Instant::now() }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Clock that advances instantly and records every sleep.
#[derive(Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        *self.now.lock() += duration;
        self.sleeps.lock().push(duration);
    }

    fn elapsed(&self) -> Duration {
        *self.now.lock()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Something that can open a store handle.
#[async_trait]
pub trait Connector: Send + Sync {
    type Store: Send;

    /// Printable target, without credentials.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Self::Store>;
}

/// Connect, retrying per `policy`. The final error names the endpoint and
/// the number of attempts made.
pub async fn connect_with_retry<C>(connector: &C, policy: &RetryPolicy, clock: &dyn Clock) -> Result<C::Store>
where
    C: Connector + ?Sized,
{
    let endpoint = connector.endpoint();
    let started = clock.elapsed();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connector.connect().await {
            Ok(store) => {
                if attempt > 1 {
                    tracing::info!(endpoint = %endpoint, attempt, "Connected after retry");
                }
                return Ok(store);
            }
            Err(e) => {
                let message = e.to_string();
                let delay = policy.delay_for(attempt);
                let waited = clock.elapsed().saturating_sub(started);
                let past_deadline = policy.deadline.is_some_and(|d| waited + delay > d);

                if attempt >= policy.max_attempts || past_deadline {
                    tracing::error!(endpoint = %endpoint, attempts = attempt, error = %message, "Giving up on connection");
                    return Err(Error::Connection { endpoint, attempts: attempt, message });
                }

                tracing::warn!(
                    endpoint = %endpoint,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %message,
                    "Store not ready, retrying"
                );
                clock.sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGraphStore;

    #[tokio::test]
    async fn test_succeeds_after_refusals() {
        let store = MemoryGraphStore::new();
        store.fail_next_connects(3);
        let clock = FakeClock::new();

        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        connect_with_retry(&store, &policy, &clock).await.unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 3]);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let store = MemoryGraphStore::new();
        store.fail_next_connects(10);
        let clock = FakeClock::new();

        let err = connect_with_retry(&store, &RetryPolicy::new(4, Duration::from_secs(1)), &clock)
            .await
            .err()
            .unwrap();
        match err {
            Error::Connection { endpoint, attempts, .. } => {
                assert_eq!(endpoint, "memory://graph");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn test_deadline_cuts_retries_short() {
        let store = MemoryGraphStore::new();
        store.fail_next_connects(10);
        let clock = FakeClock::new();

        let policy = RetryPolicy::new(30, Duration::from_secs(2)).with_deadline(Duration::from_secs(5));
        let err = connect_with_retry(&store, &policy, &clock).await.err().unwrap();
        assert!(matches!(err, Error::Connection { attempts: 3, .. }));
        assert_eq!(clock.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2)).with_backoff(Backoff::Linear);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(6));
        assert_eq!(RetryPolicy::default().delay_for(7), Duration::from_secs(2));
    }
}
