//! Abstract transactional store contract for the queue.

use chrono::{DateTime, Utc};

use super::{NewTicket, QueueState, QueueStateUpdate, StoreError, Ticket, TicketQuery, TicketStatus};

/// Maximum number of operations a single batch may carry.
pub const MAX_BATCH_SIZE: usize = 500;

/// Operations available inside an atomic transaction on the queue state record.
pub trait QueueTxn {
    /// Read the queue state (read-your-writes within the transaction).
    fn get_state(&mut self) -> Result<Option<QueueState>, StoreError>;

    /// Overwrite the whole queue state record.
    fn set_state(&mut self, state: &QueueState) -> Result<(), StoreError>;

    /// Merge a partial update into the queue state record, creating it if absent.
    fn update_state(&mut self, update: &QueueStateUpdate) -> Result<(), StoreError>;
}

/// Body of a transaction. Returning `Err` rolls the transaction back.
pub type TxnBody<'a> = dyn FnMut(&mut dyn QueueTxn) -> Result<(), StoreError> + 'a;

/// Trait for queue storage backends.
pub trait QueueStore: Send + Sync {
    /// Run `body` in one atomic transaction.
    ///
    /// Commits when the body returns `Ok`. A lost race with a concurrent
    /// transaction is reported as [`StoreError::Conflict`].
    fn run_transaction(&self, body: &mut TxnBody<'_>) -> Result<(), StoreError>;

    /// Non-transactional read of the queue state.
    fn read_state(&self) -> Result<Option<QueueState>, StoreError>;

    /// Insert a new `waiting` ticket.
    fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, StoreError>;

    /// Get a ticket by id.
    fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, StoreError>;

    /// Tickets matching the query, ascending by number.
    fn query_tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError>;

    /// Count tickets, optionally with a given status.
    fn count_tickets(&self, status: Option<TicketStatus>) -> Result<u64, StoreError>;

    /// Move a ticket from `from` to `to`, stamping the timestamp that belongs
    /// to `to`. Only applies while the ticket is still in `from`.
    ///
    /// Returns whether the transition applied.
    fn transition(
        &self,
        id: &str,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Atomic batch of [`QueueStore::transition`]; returns the ids that applied.
    fn transition_batch(
        &self,
        ids: &[String],
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    /// Delete up to [`MAX_BATCH_SIZE`] tickets atomically; returns how many
    /// rows were removed.
    fn delete_batch(&self, ids: &[String]) -> Result<usize, StoreError>;
}

/// Reject batches above the store ceiling.
pub fn check_batch_size(size: usize) -> Result<(), StoreError> {
    if size > MAX_BATCH_SIZE {
        return Err(StoreError::BatchTooLarge {
            size,
            limit: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}
