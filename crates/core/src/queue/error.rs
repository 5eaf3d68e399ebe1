use thiserror::Error;

/// Errors reported by a [`QueueStore`](super::QueueStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction lost a race with a concurrent writer; safe to retry.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// I/O or engine failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A batch exceeded the store's operation ceiling.
    #[error("batch of {size} operations exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// A persisted record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Errors surfaced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A transaction or conditional update lost a race; safe to retry.
    #[error("queue is busy, conflict persisted after {attempts} attempts")]
    StoreConflict { attempts: u32 },

    /// Store I/O failure.
    #[error("queue store unavailable: {0}")]
    StoreUnavailable(String),

    /// A ticket purge stopped at a batch that kept failing.
    #[error("ticket purge incomplete: {deleted} deleted, {remaining} remaining")]
    PartialPurge { deleted: usize, remaining: usize },

    #[error("ticket not found: {0}")]
    TicketNotFound(String),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => QueueError::StoreConflict { attempts: 1 },
            other => QueueError::StoreUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_store_conflict() {
        let err: QueueError = StoreError::Conflict("database is locked".to_string()).into();
        assert!(matches!(err, QueueError::StoreConflict { attempts: 1 }));
    }

    #[test]
    fn test_other_store_errors_map_to_unavailable() {
        let err: QueueError = StoreError::BatchTooLarge { size: 501, limit: 500 }.into();
        match err {
            QueueError::StoreUnavailable(msg) => assert!(msg.contains("501")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_partial_purge_message() {
        let err = QueueError::PartialPurge {
            deleted: 500,
            remaining: 20,
        };
        assert_eq!(
            err.to_string(),
            "ticket purge incomplete: 500 deleted, 20 remaining"
        );
    }
}
