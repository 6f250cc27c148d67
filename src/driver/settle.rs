//! # Settling
//!
//! Bounded waits for cluster metadata to propagate. A newly created scope or
//! collection is not usable everywhere at once; instead of sleeping a fixed
//! interval the driver polls a readiness check until it passes or the
//! settling window closes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::errors::{DriverError, DriverResult};
use crate::cluster::StoreResult;

/// Poll interval and upper bound for a settling wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Poll `probe` until it returns true.
///
/// Fails with `Timeout` once `policy.timeout` has elapsed without success.
/// The probe is always evaluated at least once.
pub async fn wait_until<F, Fut>(operation: &str, policy: &SettlePolicy, mut probe: F) -> DriverResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if probe().await {
            debug!(operation, attempts, "settled");
            return Ok(());
        }
        if start.elapsed() >= policy.timeout {
            return Err(DriverError::Timeout {
                operation: operation.to_string(),
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(policy.interval).await;
    }
}

/// Run `op`, repeating it while it fails because a namespace has not yet
/// propagated.
///
/// The outer result is the settling outcome; the inner result is the last
/// store outcome, returned as-is for the caller to classify.
pub async fn retry_while_propagating<T, F, Fut>(
    operation: &str,
    policy: &SettlePolicy,
    mut op: F,
) -> DriverResult<StoreResult<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let start = Instant::now();
    loop {
        match op().await {
            Err(e) if e.is_propagating() => {
                if start.elapsed() >= policy.timeout {
                    return Err(DriverError::Timeout {
                        operation: operation.to_string(),
                        waited_ms: start.elapsed().as_millis() as u64,
                    });
                }
                debug!(operation, error = %e, "waiting for namespace to propagate");
                tokio::time::sleep(policy.interval).await;
            }
            outcome => return Ok(outcome),
        }
    }
}

/// Apply an optional deadline to a driver operation.
pub async fn with_deadline<T, Fut>(
    operation: &str,
    deadline: Option<Duration>,
    fut: Fut,
) -> DriverResult<T>
where
    Fut: Future<Output = DriverResult<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| {
                Err(DriverError::Timeout {
                    operation: operation.to_string(),
                    waited_ms: limit.as_millis() as u64,
                })
            }),
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> SettlePolicy {
        SettlePolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_wait_until_succeeds_after_polls() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        wait_until("probe", &fast_policy(), || async move {
            calls.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let policy = SettlePolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(30),
        };
        let err = wait_until("create_collection settle", &policy, || async { false })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TIMEOUT");
        assert!(err.to_string().contains("create_collection settle"));
    }

    #[tokio::test]
    async fn test_retry_while_propagating_passes_through_other_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome: StoreResult<()> = retry_while_propagating("index", &fast_policy(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::CollectionNotFound {
                    keyspace: "app._default.users".to_string(),
                })
            } else {
                Err(StoreError::IndexExists {
                    index: "app._default.users.#primary".to_string(),
                })
            }
        })
        .await
        .unwrap();

        assert!(outcome.unwrap_err().is_already_exists());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_deadline_expires() {
        let err = with_deadline("slow", Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "TIMEOUT");

        let value = with_deadline("fast", None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
