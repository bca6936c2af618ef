use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::BrokerError;

/// Bounds a broker call by `limit`; an elapsed deadline becomes a transient
/// [`BrokerError::Timeout`].
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout(limit)),
    }
}

/// Fixed-delay retry for transient broker failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Runs `operation` once, then up to `max_retries` more times while it fails
    /// transiently, each attempt under `deadline`. Terminal errors return at once.
    pub async fn run<T, F, Fut>(&self, label: &str, deadline: Duration, mut operation: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt = 0;
        loop {
            match with_deadline(deadline, operation()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        label, e, attempt, self.max_retries, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_exhausted() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Duration::from_secs(5));

        let result: Result<(), _> = policy
            .run("fetch", Duration::from_secs(10), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::Network("connection reset".into()))
            })
            .await;

        assert_eq!(result, Err(BrokerError::Network("connection reset".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Duration::from_secs(5));

        let result = policy
            .run("fetch", Duration::from_secs(10), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BrokerError::RateLimited("429".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<(), _> = policy
            .run("fetch", Duration::from_secs(1), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(BrokerError::Auth("401".into()))
            })
            .await;

        assert!(matches!(result, Err(BrokerError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_maps_to_timeout() {
        let result: Result<(), _> = with_deadline(Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(BrokerError::Timeout(Duration::from_secs(2))));
    }
}
