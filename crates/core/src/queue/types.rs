//! Core queue data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known key of the singleton queue state record.
pub const QUEUE_STATE_KEY: &str = "queue_state";

// ============================================================================
// Queue State
// ============================================================================

/// The singleton numbering/pointer record, one per operating day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Last issued ticket number.
    pub current_number: u64,
    /// Ticket number most recently called (0 = none called yet).
    pub current_called: u64,
    /// Wall-clock time of the last reset (manual, scheduled or rollover).
    pub last_reset: DateTime<Utc>,
    /// Time of the last successful call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_called_at: Option<DateTime<Utc>>,
}

impl QueueState {
    /// State for a freshly started day whose first issued ticket is `first_number`.
    pub fn fresh(first_number: u64, now: DateTime<Utc>) -> Self {
        Self {
            current_number: first_number,
            current_called: 0,
            last_reset: now,
            last_called_at: None,
        }
    }

    /// State after a bulk reset: no tickets issued, none called.
    pub fn cleared(now: DateTime<Utc>) -> Self {
        Self::fresh(0, now)
    }
}

/// Partial update merged into the existing queue state.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStateUpdate {
    pub current_number: Option<u64>,
    pub current_called: Option<u64>,
    pub last_called_at: Option<DateTime<Utc>>,
}

impl QueueStateUpdate {
    pub fn with_current_number(mut self, number: u64) -> Self {
        self.current_number = Some(number);
        self
    }

    pub fn with_current_called(mut self, number: u64) -> Self {
        self.current_called = Some(number);
        self
    }

    pub fn with_last_called_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_called_at = Some(at);
        self
    }

    /// Apply this update on top of an existing state.
    ///
    /// When no state exists yet the unset counters default to 0 and
    /// `last_reset` to `now`.
    pub fn apply(&self, existing: Option<QueueState>, now: DateTime<Utc>) -> QueueState {
        let mut state = existing.unwrap_or_else(|| QueueState::cleared(now));
        if let Some(number) = self.current_number {
            state.current_number = number;
        }
        if let Some(called) = self.current_called {
            state.current_called = called;
        }
        if let Some(at) = self.last_called_at {
            state.last_called_at = Some(at);
        }
        state
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Lifecycle status of a ticket.
///
/// ```text
/// waiting --> called --> done
/// waiting --> missed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    Called,
    Done,
    Missed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "waiting",
            TicketStatus::Called => "called",
            TicketStatus::Done => "done",
            TicketStatus::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(TicketStatus::Waiting),
            "called" => Some(TicketStatus::Called),
            "done" => Some(TicketStatus::Done),
            "missed" => Some(TicketStatus::Missed),
            _ => None,
        }
    }

    /// `done` and `missed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Done | TicketStatus::Missed)
    }

    /// Whether moving from `self` to `next` is a forward edge of the lifecycle.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Waiting, TicketStatus::Called)
                | (TicketStatus::Waiting, TicketStatus::Missed)
                | (TicketStatus::Called, TicketStatus::Done)
        )
    }

    pub fn all() -> [TicketStatus; 4] {
        [
            TicketStatus::Waiting,
            TicketStatus::Called,
            TicketStatus::Done,
            TicketStatus::Missed,
        ]
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One customer's queue position record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Store-assigned identity.
    pub id: String,
    pub ticket_number: u64,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missed_at: Option<DateTime<Utc>>,
}

/// Request to insert a new waiting ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_number: u64,
    pub created_at: DateTime<Utc>,
}

/// Query over stored tickets. Results are always ordered by ascending number.
#[derive(Debug, Clone, Default)]
pub struct TicketQuery {
    pub status: Option<TicketStatus>,
    pub number: Option<u64>,
    /// Exclusive lower bound on the ticket number.
    pub number_after: Option<u64>,
    /// Exclusive upper bound on the ticket number.
    pub number_before: Option<u64>,
    /// Only tickets created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TicketQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    /// Restrict to numbers strictly between `after` and `before`.
    pub fn with_number_between(mut self, after: u64, before: u64) -> Self {
        self.number_after = Some(after);
        self.number_before = Some(before);
        self
    }

    pub fn with_created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-memory evaluation of the filter part of the query.
    pub fn matches(&self, ticket: &Ticket) -> bool {
        if self.status.is_some_and(|s| s != ticket.status) {
            return false;
        }
        if self.number.is_some_and(|n| n != ticket.ticket_number) {
            return false;
        }
        if self.number_after.is_some_and(|n| ticket.ticket_number <= n) {
            return false;
        }
        if self.number_before.is_some_and(|n| ticket.ticket_number >= n) {
            return false;
        }
        if self.created_before.is_some_and(|at| ticket.created_at >= at) {
            return false;
        }
        true
    }
}

// ============================================================================
// Operation results
// ============================================================================

/// Result of a successful ticket issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedTicket {
    pub ticket_number: u64,
    pub ticket_id: String,
    /// Whether this issuance started a new day.
    pub rolled_over: bool,
}

/// Result of a call-next operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    /// A ticket was moved to `called`.
    Called {
        ticket_number: u64,
        ticket_id: String,
        /// Previously called number that was moved to `done`, if any.
        finalized: Option<u64>,
        /// Numbers that were skipped and moved to `missed`.
        missed: Vec<u64>,
    },
    /// No one is waiting; nothing changed.
    Empty,
}

/// What triggered a bulk reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTrigger {
    /// Requested by an authorized operator.
    Manual(crate::auth::Operator),
    /// Midnight scheduler; trusted system caller.
    Scheduled,
}

impl ResetTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetTrigger::Manual(_) => "manual",
            ResetTrigger::Scheduled => "scheduled",
        }
    }

    /// Operator id for manual resets.
    pub fn operator_id(&self) -> Option<&str> {
        match self {
            ResetTrigger::Manual(operator) => Some(operator.id()),
            ResetTrigger::Scheduled => None,
        }
    }
}

/// Result of a bulk reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetOutcome {
    pub deleted_count: usize,
    /// Batches that failed at least once before committing.
    pub retried_batches: usize,
}

impl ResetOutcome {
    /// Every batch eventually committed, but some needed a retry.
    pub fn is_degraded(&self) -> bool {
        self.retried_batches > 0
    }
}

/// Read view of the queue for displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub current_number: u64,
    pub current_called: u64,
    pub waiting_count: u64,
    /// Smallest waiting number, i.e. who will be called next.
    pub next_waiting: Option<u64>,
    pub last_reset: Option<DateTime<Utc>>,
    pub last_called_at: Option<DateTime<Utc>>,
}

/// A ticket together with the customer's place in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketView {
    pub ticket: Ticket,
    pub current_called: u64,
    /// Numbers between the currently called one and this ticket; 0 once the
    /// ticket has been reached or is finished.
    pub position: u64,
}

impl TicketView {
    pub fn new(ticket: Ticket, current_called: u64) -> Self {
        let position = if ticket.status.is_terminal() || current_called >= ticket.ticket_number {
            0
        } else {
            ticket.ticket_number - current_called
        };
        Self {
            ticket,
            current_called,
            position,
        }
    }
}
