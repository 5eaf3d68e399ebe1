//! Advancing the called pointer and bulk resets.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::purge::{purge_tickets, PurgePolicy};
use super::store::MAX_BATCH_SIZE;
use super::txn::{run_with_retry, RetryPolicy};
use super::{
    CallOutcome, QueueBroadcaster, QueueError, QueueEvent, QueueState, QueueStateUpdate,
    QueueStore, ResetOutcome, ResetTrigger, Ticket, TicketQuery, TicketStatus,
};
use crate::audit::{AuditEvent, AuditHandle};
use crate::auth::Operator;
use crate::metrics;

/// Times the smallest waiting ticket is re-selected when it changes under us.
const MAX_SELECT_ATTEMPTS: u32 = 3;

/// Moves the queue forward on behalf of operators and the scheduler.
pub struct CallDispatcher {
    store: Arc<dyn QueueStore>,
    retry: RetryPolicy,
    purge: PurgePolicy,
    events: Option<QueueBroadcaster>,
    audit: Option<AuditHandle>,
}

impl CallDispatcher {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
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

    /// Call the smallest waiting number.
    ///
    /// The previously called ticket becomes `done` and any waiting tickets
    /// skipped over become `missed`. An empty queue is reported as
    /// [`CallOutcome::Empty`] and changes nothing.
    pub async fn call_next(&self, operator: &Operator) -> Result<CallOutcome, QueueError> {
        let result = self.try_call_next(operator).await;
        match &result {
            Ok(CallOutcome::Called { .. }) => {
                metrics::CALLS_TOTAL.with_label_values(&["called"]).inc()
            }
            Ok(CallOutcome::Empty) => metrics::CALLS_TOTAL.with_label_values(&["empty"]).inc(),
            Err(e) => {
                metrics::CALLS_TOTAL.with_label_values(&["failed"]).inc();
                error!(operator = operator.id(), error = %e, "Call next failed");
            }
        }
        result
    }

    async fn try_call_next(&self, operator: &Operator) -> Result<CallOutcome, QueueError> {
        let prev = self
            .store
            .read_state()?
            .map_or(0, |state| state.current_called);

        let mut finalized = None;
        let mut missed = Vec::new();

        for attempt in 1..=MAX_SELECT_ATTEMPTS {
            let Some(next) = self.smallest_waiting()? else {
                info!(operator = operator.id(), "Call next: no one waiting");
                return Ok(CallOutcome::Empty);
            };

            let now = Utc::now();
            if prev > 0 {
                finalized = finalized.or(self.finalize_called(prev, now)?);
                if next.ticket_number > prev + 1 {
                    missed.extend(self.reconcile_skipped(prev, next.ticket_number, now)?);
                }
            }

            if !self
                .store
                .transition(&next.id, TicketStatus::Waiting, TicketStatus::Called, now)?
            {
                warn!(
                    attempt,
                    ticket_number = next.ticket_number,
                    "Selected ticket changed concurrently, selecting again"
                );
                continue;
            }

            let number = next.ticket_number;
            run_with_retry(self.store.as_ref(), self.retry, |txn| {
                txn.update_state(
                    &QueueStateUpdate::default()
                        .with_current_called(number)
                        .with_last_called_at(now),
                )
            })
            .await?;

            self.announce_call(operator, &next, finalized, &missed)
                .await;

            return Ok(CallOutcome::Called {
                ticket_number: next.ticket_number,
                ticket_id: next.id,
                finalized,
                missed,
            });
        }

        Err(QueueError::StoreConflict {
            attempts: MAX_SELECT_ATTEMPTS,
        })
    }

    fn smallest_waiting(&self) -> Result<Option<Ticket>, QueueError> {
        Ok(self
            .store
            .query_tickets(
                &TicketQuery::new()
                    .with_status(TicketStatus::Waiting)
                    .with_limit(1),
            )?
            .into_iter()
            .next())
    }

    /// Move the `called` ticket numbered `prev` to `done`.
    ///
    /// Returns `Some(prev)` only if a transition applied; an already
    /// finalized or deleted ticket is left as it is.
    fn finalize_called(&self, prev: u64, now: DateTime<Utc>) -> Result<Option<u64>, QueueError> {
        let called = self.store.query_tickets(
            &TicketQuery::new()
                .with_number(prev)
                .with_status(TicketStatus::Called),
        )?;

        let mut finalized = None;
        for ticket in called {
            if self
                .store
                .transition(&ticket.id, TicketStatus::Called, TicketStatus::Done, now)?
            {
                finalized = Some(prev);
            }
        }

        if finalized.is_none() {
            debug!(ticket_number = prev, "Previously called ticket already finalized");
        }
        Ok(finalized)
    }

    /// Mark waiting tickets numbered strictly between `prev` and `next` as missed.
    fn reconcile_skipped(
        &self,
        prev: u64,
        next: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<u64>, QueueError> {
        let skipped = self.store.query_tickets(
            &TicketQuery::new()
                .with_status(TicketStatus::Waiting)
                .with_number_between(prev, next),
        )?;

        let mut missed = Vec::new();
        for batch in skipped.chunks(MAX_BATCH_SIZE) {
            let ids: Vec<String> = batch.iter().map(|t| t.id.clone()).collect();
            let applied = self.store.transition_batch(
                &ids,
                TicketStatus::Waiting,
                TicketStatus::Missed,
                now,
            )?;
            if applied.len() < ids.len() {
                debug!(
                    expected = ids.len(),
                    applied = applied.len(),
                    "Some skipped tickets changed status concurrently"
                );
            }
            missed.extend(
                batch
                    .iter()
                    .filter(|t| applied.contains(&t.id))
                    .map(|t| t.ticket_number),
            );
        }

        if !missed.is_empty() {
            metrics::TICKETS_MISSED.inc_by(missed.len() as u64);
            info!(prev, next, count = missed.len(), "Marked skipped tickets as missed");
        }
        Ok(missed)
    }

    async fn announce_call(
        &self,
        operator: &Operator,
        ticket: &Ticket,
        finalized: Option<u64>,
        missed: &[u64],
    ) {
        info!(
            operator = operator.id(),
            ticket_number = ticket.ticket_number,
            ?finalized,
            missed = missed.len(),
            "Called ticket"
        );

        if let Some(ref events) = self.events {
            events.publish(QueueEvent::TicketCalled {
                ticket_number: ticket.ticket_number,
                ticket_id: ticket.id.clone(),
                finalized,
                missed: missed.to_vec(),
            });
        }
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::TicketCalled {
                    ticket_id: ticket.id.clone(),
                    ticket_number: ticket.ticket_number,
                    called_by: operator.id().to_string(),
                    finalized,
                    missed: missed.to_vec(),
                })
                .await;
        }
    }

    /// Delete every ticket and zero the counters.
    ///
    /// The counters are only reset once every ticket is gone; an incomplete
    /// purge reports [`QueueError::PartialPurge`] and leaves the state alone.
    pub async fn reset_all(&self, trigger: ResetTrigger) -> Result<ResetOutcome, QueueError> {
        let trigger_name = trigger.as_str();

        let report = match purge_tickets(self.store.as_ref(), &TicketQuery::new(), self.purge).await
        {
            Ok(report) => report,
            Err(e) => {
                metrics::RESETS_TOTAL
                    .with_label_values(&[trigger_name, "failed"])
                    .inc();
                error!(trigger = trigger_name, error = %e, "Queue reset failed");
                return Err(e);
            }
        };

        let now = Utc::now();
        if let Err(e) = run_with_retry(self.store.as_ref(), self.retry, |txn| {
            txn.set_state(&QueueState::cleared(now))
        })
        .await
        {
            metrics::RESETS_TOTAL
                .with_label_values(&[trigger_name, "failed"])
                .inc();
            error!(
                trigger = trigger_name,
                deleted = report.deleted,
                error = %e,
                "Queue reset deleted tickets but could not clear the counters"
            );
            return Err(e);
        }

        let outcome = ResetOutcome {
            deleted_count: report.deleted,
            retried_batches: report.retried_batches,
        };

        if outcome.is_degraded() {
            metrics::RESETS_TOTAL
                .with_label_values(&[trigger_name, "degraded"])
                .inc();
            warn!(
                trigger = trigger_name,
                deleted = outcome.deleted_count,
                retried_batches = outcome.retried_batches,
                "Queue reset completed after batch retries"
            );
        } else {
            metrics::RESETS_TOTAL
                .with_label_values(&[trigger_name, "success"])
                .inc();
            info!(
                trigger = trigger_name,
                operator = trigger.operator_id(),
                deleted = outcome.deleted_count,
                "Queue reset"
            );
        }

        if let Some(ref events) = self.events {
            events.publish(QueueEvent::QueueReset {
                trigger: trigger_name.to_string(),
                deleted_count: outcome.deleted_count,
            });
        }
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::QueueReset {
                    trigger: trigger_name.to_string(),
                    reset_by: trigger.operator_id().map(String::from),
                    deleted_count: outcome.deleted_count,
                    retried_batches: outcome.retried_batches,
                })
                .await;
        }

        Ok(outcome)
    }
}
