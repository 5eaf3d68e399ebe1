//! Ticket issuance, daily rollover and read views.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{error, info, warn};

use super::calendar::{is_new_day, start_of_local_day};
use super::purge::{purge_tickets, PurgePolicy};
use super::txn::{run_with_retry, RetryPolicy};
use super::{
    IssuedTicket, NewTicket, QueueBroadcaster, QueueError, QueueEvent, QueueSnapshot, QueueState,
    QueueStateUpdate, QueueStore, Ticket, TicketQuery, TicketStatus, TicketView,
};
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;

/// Owns the numbering counter and the daily rollover policy.
///
/// Holds no queue state of its own; every call reads the store.
pub struct QueueStateManager {
    store: Arc<dyn QueueStore>,
    tz: FixedOffset,
    retry: RetryPolicy,
    purge: PurgePolicy,
    events: Option<QueueBroadcaster>,
    audit: Option<AuditHandle>,
}

/// Purge-then-rollover rounds one issuance may go through.
const ROLLOVER_ATTEMPTS: u32 = 3;

/// A number reserved by the issuance transaction.
struct Allocation {
    number: u64,
    issued_at: DateTime<Utc>,
    /// `last_reset` of the day that was closed by a rollover.
    rolled_over_from: Option<DateTime<Utc>>,
}

/// What the issuance transaction decided.
enum IssueStep {
    Allocated(Allocation),
    /// A new day began; tickets created before this instant must go first.
    PurgeBefore(DateTime<Utc>),
}

impl QueueStateManager {
    pub fn new(store: Arc<dyn QueueStore>, tz: FixedOffset) -> Self {
        Self {
            store,
            tz,
            retry: RetryPolicy::default(),
            purge: PurgePolicy::default(),
            events: None,
            audit: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_purge_policy(mut self, purge: PurgePolicy) -> Self {
        self.purge = purge;
        self
    }

    pub fn with_events(mut self, events: QueueBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn time_zone(&self) -> FixedOffset {
        self.tz
    }

    /// Issue the next ticket number.
    ///
    /// The first issuance on a new local day resets the counter to 1 and
    /// purges the previous day's tickets before the new ticket is created.
    pub async fn issue_ticket(&self) -> Result<IssuedTicket, QueueError> {
        let result = self.try_issue_ticket().await;
        if let Err(ref e) = result {
            metrics::ISSUE_FAILURES.inc();
            error!(error = %e, "Failed to issue ticket");
        }
        result
    }

    async fn try_issue_ticket(&self) -> Result<IssuedTicket, QueueError> {
        let tz = self.tz;
        // Local midnight before which every ticket is known to be deleted
        let mut purged_before: Option<DateTime<Utc>> = None;
        let mut purged = 0;
        let mut attempt = 0;

        let allocation = loop {
            attempt += 1;
            let step = run_with_retry(self.store.as_ref(), self.retry, |txn| {
                // Read the clock under the transaction so issue times follow commit order
                let now = Utc::now();
                match txn.get_state()? {
                    None => {
                        txn.set_state(&QueueState::fresh(1, now))?;
                        Ok(IssueStep::Allocated(Allocation {
                            number: 1,
                            issued_at: now,
                            rolled_over_from: None,
                        }))
                    }
                    Some(state) if is_new_day(state.last_reset, now, &tz) => {
                        // Numbering restarts only once the earlier days' tickets are gone
                        let day_start = start_of_local_day(now, &tz);
                        if purged_before != Some(day_start) {
                            return Ok(IssueStep::PurgeBefore(day_start));
                        }
                        txn.set_state(&QueueState::fresh(1, now))?;
                        Ok(IssueStep::Allocated(Allocation {
                            number: 1,
                            issued_at: now,
                            rolled_over_from: Some(state.last_reset),
                        }))
                    }
                    Some(state) => {
                        let number = state.current_number + 1;
                        txn.update_state(
                            &QueueStateUpdate::default().with_current_number(number),
                        )?;
                        Ok(IssueStep::Allocated(Allocation {
                            number,
                            issued_at: now,
                            rolled_over_from: None,
                        }))
                    }
                }
            })
            .await?;

            match step {
                IssueStep::Allocated(allocation) => break allocation,
                IssueStep::PurgeBefore(cutoff) if attempt < ROLLOVER_ATTEMPTS => {
                    purged += self.purge_before(cutoff).await?;
                    purged_before = Some(cutoff);
                }
                IssueStep::PurgeBefore(cutoff) => {
                    return Err(QueueError::StoreUnavailable(format!(
                        "rollover to the day starting {} did not settle after {} attempts",
                        cutoff, ROLLOVER_ATTEMPTS
                    )));
                }
            }
        };

        if let Some(previous_reset) = allocation.rolled_over_from {
            self.record_rollover(previous_reset, purged).await;
        }

        let ticket = self.store.create_ticket(NewTicket {
            ticket_number: allocation.number,
            created_at: allocation.issued_at,
        })?;

        let rolled_over = allocation.rolled_over_from.is_some();
        metrics::TICKETS_ISSUED.inc();
        info!(
            ticket_number = ticket.ticket_number,
            ticket_id = %ticket.id,
            rolled_over,
            "Issued ticket"
        );

        if let Some(ref events) = self.events {
            events.publish(QueueEvent::TicketIssued {
                ticket_number: ticket.ticket_number,
                ticket_id: ticket.id.clone(),
                rolled_over,
            });
        }
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::TicketIssued {
                    ticket_id: ticket.id.clone(),
                    ticket_number: ticket.ticket_number,
                    rolled_over,
                })
                .await;
        }

        Ok(IssuedTicket {
            ticket_number: ticket.ticket_number,
            ticket_id: ticket.id,
            rolled_over,
        })
    }

    /// Delete every ticket created before `cutoff`.
    ///
    /// Runs before the rollover commits, so a failed purge leaves the old day
    /// in place and the next issuance tries again.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError> {
        let query = TicketQuery::new().with_created_before(cutoff);
        let report = purge_tickets(self.store.as_ref(), &query, self.purge).await?;

        if report.retried_batches > 0 {
            warn!(
                deleted = report.deleted,
                retried_batches = report.retried_batches,
                "Rollover purge needed batch retries"
            );
        }
        Ok(report.deleted)
    }

    async fn record_rollover(&self, previous_reset: DateTime<Utc>, purged: usize) {
        metrics::ROLLOVERS.inc();
        info!(%previous_reset, purged, "Rolled over to a new day");

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::QueueRolledOver {
                    previous_reset,
                    purged_count: purged,
                })
                .await;
        }
    }

    /// Current counters plus who is waiting.
    pub fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let state = self.store.read_state()?;
        let waiting_count = self.store.count_tickets(Some(TicketStatus::Waiting))?;
        let next_waiting = self
            .store
            .query_tickets(
                &TicketQuery::new()
                    .with_status(TicketStatus::Waiting)
                    .with_limit(1),
            )?
            .first()
            .map(|ticket| ticket.ticket_number);

        Ok(QueueSnapshot {
            current_number: state.as_ref().map_or(0, |s| s.current_number),
            current_called: state.as_ref().map_or(0, |s| s.current_called),
            waiting_count,
            next_waiting,
            last_reset: state.as_ref().map(|s| s.last_reset),
            last_called_at: state.and_then(|s| s.last_called_at),
        })
    }

    /// A ticket with its place in line.
    pub fn ticket_view(&self, ticket_id: &str) -> Result<TicketView, QueueError> {
        let ticket = self
            .store
            .get_ticket(ticket_id)?
            .ok_or_else(|| QueueError::TicketNotFound(ticket_id.to_string()))?;
        let current_called = self
            .store
            .read_state()?
            .map_or(0, |state| state.current_called);

        Ok(TicketView::new(ticket, current_called))
    }

    /// Tickets in ascending number order.
    pub fn list_tickets(
        &self,
        status: Option<TicketStatus>,
        limit: usize,
    ) -> Result<Vec<Ticket>, QueueError> {
        let mut query = TicketQuery::new().with_limit(limit);
        if let Some(status) = status {
            query = query.with_status(status);
        }
        Ok(self.store.query_tickets(&query)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{parse_utc_offset, QueueTxn, SqliteQueueStore};
    use crate::testing::MockQueueStore;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn jakarta() -> FixedOffset {
        parse_utc_offset("+07:00").unwrap()
    }

    fn manager(store: Arc<dyn QueueStore>) -> QueueStateManager {
        QueueStateManager::new(store, jakarta())
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
            .with_purge_policy(PurgePolicy::new(2, 2, Duration::from_millis(1)))
    }

    fn set_state(store: &dyn QueueStore, state: QueueState) {
        store
            .run_transaction(&mut |txn: &mut dyn QueueTxn| txn.set_state(&state))
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_ticket_is_one() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let manager = manager(store.clone());

        let issued = manager.issue_ticket().await.unwrap();

        assert_eq!(issued.ticket_number, 1);
        assert!(!issued.rolled_over);
        let state = store.read_state().unwrap().unwrap();
        assert_eq!(state.current_number, 1);
        assert_eq!(state.current_called, 0);

        let ticket = store.get_ticket(&issued.ticket_id).unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Waiting);
    }

    #[tokio::test]
    async fn test_numbers_increase_within_a_day() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let manager = manager(store.clone());

        let mut numbers = Vec::new();
        for _ in 0..4 {
            numbers.push(manager.issue_ticket().await.unwrap().ticket_number);
        }

        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_issue_keeps_called_pointer() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        set_state(
            store.as_ref(),
            QueueState {
                current_number: 5,
                current_called: 3,
                last_reset: Utc::now(),
                last_called_at: Some(Utc::now()),
            },
        );

        let issued = manager(store.clone()).issue_ticket().await.unwrap();

        assert_eq!(issued.ticket_number, 6);
        let state = store.read_state().unwrap().unwrap();
        assert_eq!(state.current_called, 3);
        assert!(state.last_called_at.is_some());
    }

    #[tokio::test]
    async fn test_rollover_purges_previous_day() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let yesterday = Utc::now() - ChronoDuration::days(2);
        set_state(
            store.as_ref(),
            QueueState {
                current_number: 7,
                current_called: 4,
                last_reset: yesterday,
                last_called_at: None,
            },
        );
        for number in 1..=7 {
            store
                .create_ticket(NewTicket {
                    ticket_number: number,
                    created_at: yesterday + ChronoDuration::minutes(number as i64),
                })
                .unwrap();
        }

        let issued = manager(store.clone()).issue_ticket().await.unwrap();

        assert_eq!(issued.ticket_number, 1);
        assert!(issued.rolled_over);

        let state = store.read_state().unwrap().unwrap();
        assert_eq!(state.current_number, 1);
        assert_eq!(state.current_called, 0);
        assert!(state.last_reset > yesterday);

        let tickets = store.query_tickets(&TicketQuery::new()).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].id, issued.ticket_id);
    }

    #[tokio::test]
    async fn test_rollover_purge_failure_creates_no_ticket() {
        let mock = Arc::new(MockQueueStore::new());
        let yesterday = Utc::now() - ChronoDuration::days(1) - ChronoDuration::hours(1);
        set_state(mock.as_ref(), QueueState::fresh(3, yesterday));
        for number in 1..=3 {
            mock.create_ticket(NewTicket {
                ticket_number: number,
                created_at: yesterday,
            })
            .unwrap();
        }
        mock.fail_deletes_after(0);

        let result = manager(mock.clone()).issue_ticket().await;

        assert!(matches!(
            result,
            Err(QueueError::PartialPurge {
                deleted: 0,
                remaining: 3
            })
        ));
        assert_eq!(mock.count_tickets(None).unwrap(), 3);

        // The old day stays open, so the next issuance rolls over again
        let state = mock.read_state().unwrap().unwrap();
        assert_eq!(state.last_reset, yesterday);
        assert_eq!(state.current_number, 3);
        assert!(manager(mock.clone()).issue_ticket().await.is_err());
        assert_eq!(mock.count_tickets(None).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rollover_completes_after_failed_purge() {
        let mock = Arc::new(MockQueueStore::new());
        let yesterday = Utc::now() - ChronoDuration::days(1) - ChronoDuration::hours(1);
        set_state(mock.as_ref(), QueueState::fresh(3, yesterday));
        for number in 1..=3 {
            mock.create_ticket(NewTicket {
                ticket_number: number,
                created_at: yesterday,
            })
            .unwrap();
        }
        // Both attempts at the first batch fail
        mock.fail_next_deletes(2);
        let manager = manager(mock.clone());

        assert!(matches!(
            manager.issue_ticket().await,
            Err(QueueError::PartialPurge { deleted: 0, .. })
        ));

        let first = manager.issue_ticket().await.unwrap();
        let second = manager.issue_ticket().await.unwrap();
        assert_eq!(first.ticket_number, 1);
        assert!(first.rolled_over);
        assert_eq!(second.ticket_number, 2);
        assert!(!second.rolled_over);

        let numbers: Vec<u64> = mock
            .query_tickets(&TicketQuery::new())
            .unwrap()
            .iter()
            .map(|ticket| ticket.ticket_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_into_store_unavailable() {
        let mock = Arc::new(MockQueueStore::new());
        mock.fail_next_transactions(10);

        let result = manager(mock.clone()).issue_ticket().await;

        assert!(matches!(result, Err(QueueError::StoreUnavailable(_))));
        assert_eq!(mock.count_tickets(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_issue_publishes_event() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let events = QueueBroadcaster::new(8);
        let mut rx = events.subscribe();
        let manager = manager(store).with_events(events);

        let issued = manager.issue_ticket().await.unwrap();

        match rx.recv().await.unwrap() {
            QueueEvent::TicketIssued {
                ticket_number,
                ticket_id,
                rolled_over,
            } => {
                assert_eq!(ticket_number, 1);
                assert_eq!(ticket_id, issued.ticket_id);
                assert!(!rolled_over);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_snapshot_and_view() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let manager = manager(store.clone());

        let empty = manager.snapshot().unwrap();
        assert_eq!(empty.current_number, 0);
        assert_eq!(empty.waiting_count, 0);
        assert_eq!(empty.next_waiting, None);
        assert_eq!(empty.last_reset, None);

        let first = manager.issue_ticket().await.unwrap();
        let third = {
            manager.issue_ticket().await.unwrap();
            manager.issue_ticket().await.unwrap()
        };
        store
            .transition(
                &first.ticket_id,
                TicketStatus::Waiting,
                TicketStatus::Called,
                Utc::now(),
            )
            .unwrap();
        store
            .run_transaction(&mut |txn: &mut dyn QueueTxn| {
                txn.update_state(&QueueStateUpdate::default().with_current_called(1))
            })
            .unwrap();

        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.current_number, 3);
        assert_eq!(snapshot.current_called, 1);
        assert_eq!(snapshot.waiting_count, 2);
        assert_eq!(snapshot.next_waiting, Some(2));

        let view = manager.ticket_view(&third.ticket_id).unwrap();
        assert_eq!(view.position, 2);
        assert_eq!(view.current_called, 1);

        let called = manager.ticket_view(&first.ticket_id).unwrap();
        assert_eq!(called.position, 0);
    }

    #[tokio::test]
    async fn test_view_of_deleted_ticket_is_not_found() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let manager = manager(store);

        let result = manager.ticket_view("no-such-ticket");

        assert!(matches!(result, Err(QueueError::TicketNotFound(id)) if id == "no-such-ticket"));
    }

    #[tokio::test]
    async fn test_list_tickets_filters_and_limits() {
        let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let manager = manager(store.clone());
        let first = manager.issue_ticket().await.unwrap();
        for _ in 0..3 {
            manager.issue_ticket().await.unwrap();
        }
        store
            .transition(
                &first.ticket_id,
                TicketStatus::Waiting,
                TicketStatus::Called,
                Utc::now(),
            )
            .unwrap();

        let waiting = manager
            .list_tickets(Some(TicketStatus::Waiting), 2)
            .unwrap();
        let numbers: Vec<u64> = waiting.iter().map(|t| t.ticket_number).collect();
        assert_eq!(numbers, vec![2, 3]);

        assert_eq!(manager.list_tickets(None, 100).unwrap().len(), 4);
    }
}
