//! Bounded retry of store transactions that lose a race.

use std::time::Duration;

use tracing::warn;

use super::{QueueError, QueueStore, QueueTxn, StoreError};
use crate::metrics;

/// How often, and how patiently, a conflicting transaction is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(20))
    }
}

/// Run `body` in a store transaction, retrying on [`StoreError::Conflict`].
///
/// The body may run several times; only the value of the committed run is
/// returned. Non-conflict errors abort immediately. A conflict that outlasts
/// every attempt is reported as [`QueueError::StoreUnavailable`].
pub async fn run_with_retry<T, F>(
    store: &dyn QueueStore,
    policy: RetryPolicy,
    mut body: F,
) -> Result<T, QueueError>
where
    F: FnMut(&mut dyn QueueTxn) -> Result<T, StoreError>,
{
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        let mut committed = None;
        let result = store.run_transaction(&mut |txn: &mut dyn QueueTxn| {
            committed = Some(body(txn)?);
            Ok(())
        });

        match result {
            Ok(()) => {
                return committed.ok_or_else(|| {
                    QueueError::StoreUnavailable(
                        "transaction committed without producing a result".to_string(),
                    )
                });
            }
            Err(e) if e.is_conflict() => {
                if attempt < attempts {
                    metrics::TRANSACTION_CONFLICTS
                        .with_label_values(&["retried"])
                        .inc();
                    warn!(attempt, max_attempts = attempts, error = %e, "Transaction conflict, retrying");
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    metrics::TRANSACTION_CONFLICTS
        .with_label_values(&["exhausted"])
        .inc();
    Err(QueueError::StoreUnavailable(format!(
        "transaction conflict persisted after {} attempts",
        attempts
    )))
}
