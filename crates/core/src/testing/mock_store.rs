//! In-memory queue store with fault injection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::queue::{
    check_batch_size, NewTicket, QueueState, QueueStateUpdate, QueueStore, QueueTxn, StoreError,
    Ticket, TicketQuery, TicketStatus, TxnBody,
};

#[derive(Debug, Default)]
struct Contents {
    state: Option<QueueState>,
    tickets: Vec<Ticket>,
    next_id: u64,
}

/// Mock implementation of the [`QueueStore`] trait.
///
/// Behaves like a real store and lets tests inject failures:
/// - forced transaction conflicts
/// - failing delete batches, either the next few or all after a point
/// - a concurrent status change landing just before a batch transition
///
/// # Example
///
/// ```rust,ignore
/// use walkin_core::testing::MockQueueStore;
///
/// let store = MockQueueStore::new();
/// store.fail_next_transactions(2);
/// store.fail_deletes_after(1);
/// ```
#[derive(Debug, Default)]
pub struct MockQueueStore {
    contents: Mutex<Contents>,
    /// Transactions still to be rejected with a conflict.
    pending_conflicts: AtomicU32,
    transaction_attempts: AtomicU32,
    /// Delete batches still to be rejected.
    pending_delete_failures: AtomicU32,
    /// Successful delete batches allowed before every later one fails.
    delete_budget: Mutex<Option<u32>>,
    delete_batch_sizes: Mutex<Vec<usize>>,
    /// Ticket numbers moved to a status right before the next batch transition.
    batch_interference: Mutex<Option<(Vec<u64>, TicketStatus)>>,
}

impl MockQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` transactions with [`StoreError::Conflict`].
    pub fn fail_next_transactions(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Reject the next `count` delete batches.
    pub fn fail_next_deletes(&self, count: u32) {
        self.pending_delete_failures.store(count, Ordering::SeqCst);
    }

    /// Let `successes` delete batches commit, then fail every later one.
    pub fn fail_deletes_after(&self, successes: u32) {
        if let Ok(mut budget) = self.delete_budget.lock() {
            *budget = Some(successes);
        }
    }

    /// Before the next `transition_batch` applies, move the tickets numbered
    /// `numbers` to `status`, as another writer would.
    pub fn interfere_with_next_batch(&self, numbers: &[u64], status: TicketStatus) {
        if let Ok(mut slot) = self.batch_interference.lock() {
            *slot = Some((numbers.to_vec(), status));
        }
    }

    /// Number of `run_transaction` calls, including rejected ones.
    pub fn transaction_attempts(&self) -> u32 {
        self.transaction_attempts.load(Ordering::SeqCst)
    }

    /// Sizes of every delete batch submitted, including rejected ones.
    pub fn delete_batch_sizes(&self) -> Vec<usize> {
        self.delete_batch_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }

    fn contents(&self) -> Result<MutexGuard<'_, Contents>, StoreError> {
        self.contents
            .lock()
            .map_err(|_| StoreError::Unavailable("mock store lock poisoned".to_string()))
    }

    fn take_delete_failure(&self) -> bool {
        let forced = self
            .pending_delete_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return true;
        }

        match self.delete_budget.lock() {
            Ok(mut budget) => match budget.as_mut() {
                Some(0) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            },
            Err(_) => true,
        }
    }
}

struct MockTxn {
    state: Option<QueueState>,
}

impl QueueTxn for MockTxn {
    fn get_state(&mut self) -> Result<Option<QueueState>, StoreError> {
        Ok(self.state.clone())
    }

    fn set_state(&mut self, state: &QueueState) -> Result<(), StoreError> {
        self.state = Some(state.clone());
        Ok(())
    }

    fn update_state(&mut self, update: &QueueStateUpdate) -> Result<(), StoreError> {
        self.state = Some(update.apply(self.state.take(), Utc::now()));
        Ok(())
    }
}

impl QueueStore for MockQueueStore {
    fn run_transaction(&self, body: &mut TxnBody<'_>) -> Result<(), StoreError> {
        self.transaction_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        // Holding the lock for the whole body serializes transactions
        let mut contents = self.contents()?;
        let mut txn = MockTxn {
            state: contents.state.clone(),
        };
        body(&mut txn)?;
        contents.state = txn.state;
        Ok(())
    }

    fn read_state(&self) -> Result<Option<QueueState>, StoreError> {
        Ok(self.contents()?.state.clone())
    }

    fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, StoreError> {
        let mut contents = self.contents()?;
        contents.next_id += 1;
        let ticket = Ticket {
            id: format!("mock-ticket-{}", contents.next_id),
            ticket_number: ticket.ticket_number,
            status: TicketStatus::Waiting,
            created_at: ticket.created_at,
            called_at: None,
            done_at: None,
            missed_at: None,
        };
        contents.tickets.push(ticket.clone());
        Ok(ticket)
    }

    fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self
            .contents()?
            .tickets
            .iter()
            .find(|ticket| ticket.id == id)
            .cloned())
    }

    fn query_tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets: Vec<Ticket> = self
            .contents()?
            .tickets
            .iter()
            .filter(|ticket| query.matches(ticket))
            .cloned()
            .collect();
        tickets.sort_by_key(|ticket| ticket.ticket_number);
        if let Some(limit) = query.limit {
            tickets.truncate(limit);
        }
        Ok(tickets)
    }

    fn count_tickets(&self, status: Option<TicketStatus>) -> Result<u64, StoreError> {
        Ok(self
            .contents()?
            .tickets
            .iter()
            .filter(|ticket| status.is_none_or(|s| ticket.status == s))
            .count() as u64)
    }

    fn transition(
        &self,
        id: &str,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut contents = self.contents()?;
        Ok(contents
            .tickets
            .iter_mut()
            .find(|ticket| ticket.id == id)
            .is_some_and(|ticket| apply_transition(ticket, from, to, at)))
    }

    fn transition_batch(
        &self,
        ids: &[String],
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        check_batch_size(ids.len())?;
        let interference = self
            .batch_interference
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());

        let mut contents = self.contents()?;
        if let Some((numbers, status)) = interference {
            for ticket in contents
                .tickets
                .iter_mut()
                .filter(|ticket| numbers.contains(&ticket.ticket_number))
            {
                let current = ticket.status;
                apply_transition(ticket, current, status, at);
            }
        }

        Ok(contents
            .tickets
            .iter_mut()
            .filter(|ticket| ids.contains(&ticket.id))
            .filter_map(|ticket| apply_transition(ticket, from, to, at).then(|| ticket.id.clone()))
            .collect())
    }

    fn delete_batch(&self, ids: &[String]) -> Result<usize, StoreError> {
        check_batch_size(ids.len())?;
        if let Ok(mut sizes) = self.delete_batch_sizes.lock() {
            sizes.push(ids.len());
        }
        if self.take_delete_failure() {
            return Err(StoreError::Unavailable("injected delete failure".to_string()));
        }

        let mut contents = self.contents()?;
        let before = contents.tickets.len();
        contents.tickets.retain(|ticket| !ids.contains(&ticket.id));
        Ok(before - contents.tickets.len())
    }
}

fn apply_transition(
    ticket: &mut Ticket,
    from: TicketStatus,
    to: TicketStatus,
    at: DateTime<Utc>,
) -> bool {
    if ticket.status != from || !from.can_transition_to(to) {
        return false;
    }
    ticket.status = to;
    match to {
        TicketStatus::Called => ticket.called_at = Some(at),
        TicketStatus::Done => ticket.done_at = Some(at),
        TicketStatus::Missed => ticket.missed_at = Some(at),
        TicketStatus::Waiting => {}
    }
    true
}
