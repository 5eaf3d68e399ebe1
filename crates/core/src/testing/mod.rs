//! Testing utilities and mock implementations.
//!
//! [`MockQueueStore`] implements the queue store contract in memory and can
//! inject the failures a real store produces under load: transaction
//! conflicts and failing delete batches.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use walkin_core::testing::MockQueueStore;
//! use walkin_core::CallDispatcher;
//!
//! let store = Arc::new(MockQueueStore::new());
//! store.fail_next_deletes(1);
//! let dispatcher = CallDispatcher::new(store.clone());
//! ```

mod mock_store;

pub use mock_store::MockQueueStore;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::queue::{NewTicket, QueueState, QueueStore, QueueTxn, StoreError, Ticket};

    /// Insert waiting tickets with the given numbers, all created now.
    pub fn waiting_tickets(
        store: &dyn QueueStore,
        numbers: &[u64],
    ) -> Result<Vec<Ticket>, StoreError> {
        numbers
            .iter()
            .map(|&number| {
                store.create_ticket(NewTicket {
                    ticket_number: number,
                    created_at: Utc::now(),
                })
            })
            .collect()
    }

    /// Overwrite the queue state record.
    pub fn set_state(store: &dyn QueueStore, state: QueueState) -> Result<(), StoreError> {
        store.run_transaction(&mut |txn: &mut dyn QueueTxn| txn.set_state(&state))
    }
}
