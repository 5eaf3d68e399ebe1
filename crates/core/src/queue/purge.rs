//! Chunked ticket deletion shared by resets and rollovers.

use std::time::Duration;

use tracing::{debug, error, warn};

use super::store::MAX_BATCH_SIZE;
use super::{QueueError, QueueStore, TicketQuery};
use crate::metrics;

/// Batch sizing and retry settings for a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgePolicy {
    pub batch_size: usize,
    /// Attempts per batch, including the first one.
    pub batch_attempts: u32,
    pub backoff: Duration,
}

impl PurgePolicy {
    pub fn new(batch_size: usize, batch_attempts: u32, backoff: Duration) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            batch_attempts: batch_attempts.max(1),
            backoff,
        }
    }
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self::new(MAX_BATCH_SIZE, 3, Duration::from_millis(20))
    }
}

/// Outcome of a completed purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: usize,
    /// Batches that failed at least once before committing.
    pub retried_batches: usize,
}

/// Delete every ticket matching `query` in sequential batches.
///
/// Committed batches stay committed. When a batch still fails after all
/// attempts the purge stops with [`QueueError::PartialPurge`], reporting how
/// many tickets were deleted and how many were left untouched.
pub async fn purge_tickets(
    store: &dyn QueueStore,
    query: &TicketQuery,
    policy: PurgePolicy,
) -> Result<PurgeReport, QueueError> {
    let ids: Vec<String> = store
        .query_tickets(query)?
        .into_iter()
        .map(|ticket| ticket.id)
        .collect();

    let total = ids.len();
    let mut report = PurgeReport::default();
    let mut processed = 0;

    for (index, batch) in ids.chunks(policy.batch_size).enumerate() {
        let mut attempt = 1;
        loop {
            match store.delete_batch(batch) {
                Ok(deleted) => {
                    report.deleted += deleted;
                    if attempt > 1 {
                        report.retried_batches += 1;
                    }
                    debug!(batch = index, deleted, "Committed delete batch");
                    break;
                }
                Err(e) if attempt < policy.batch_attempts => {
                    metrics::BATCH_RETRIES.inc();
                    warn!(batch = index, attempt, error = %e, "Delete batch failed, retrying");
                    tokio::time::sleep(policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    let remaining = total - processed;
                    error!(
                        batch = index,
                        deleted = report.deleted,
                        remaining,
                        error = %e,
                        "Delete batch failed permanently, purge incomplete"
                    );
                    metrics::TICKETS_PURGED.inc_by(report.deleted as u64);
                    return Err(QueueError::PartialPurge {
                        deleted: report.deleted,
                        remaining,
                    });
                }
            }
        }
        processed += batch.len();
    }

    metrics::TICKETS_PURGED.inc_by(report.deleted as u64);
    metrics::PURGE_SIZE
        .with_label_values(&[])
        .observe(report.deleted as f64);

    Ok(report)
}
