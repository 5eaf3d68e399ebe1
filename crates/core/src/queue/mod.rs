//! Walk-in queue: numbering, calling and resets.
//!
//! - [`QueueStateManager`] issues tickets and owns the daily rollover.
//! - [`CallDispatcher`] advances the called pointer and performs bulk resets.
//!
//! Both reach persistence only through the [`QueueStore`] trait.

mod calendar;
mod dispatcher;
mod error;
mod events;
mod manager;
mod purge;
mod sqlite_store;
mod store;
mod txn;
mod types;

pub use calendar::{
    is_new_day, local_date, next_midnight_after, parse_utc_offset, start_of_local_day,
};
pub use dispatcher::CallDispatcher;
pub use error::{QueueError, StoreError};
pub use events::{QueueBroadcaster, QueueEvent, DEFAULT_EVENT_CAPACITY};
pub use manager::QueueStateManager;
pub use purge::{purge_tickets, PurgePolicy, PurgeReport};
pub use sqlite_store::SqliteQueueStore;
pub use store::{check_batch_size, QueueStore, QueueTxn, TxnBody, MAX_BATCH_SIZE};
pub use txn::{run_with_retry, RetryPolicy};
pub use types::*;
