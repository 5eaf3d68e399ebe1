use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Queue events
    TicketIssued {
        ticket_id: String,
        ticket_number: u64,
        rolled_over: bool,
    },
    TicketCalled {
        ticket_id: String,
        ticket_number: u64,
        /// Operator who called the ticket
        called_by: String,
        /// Previously called number moved to done
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finalized: Option<u64>,
        /// Numbers skipped and moved to missed
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missed: Vec<u64>,
    },
    QueueReset {
        /// "manual" or "scheduled"
        trigger: String,
        /// Operator for manual resets
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset_by: Option<String>,
        deleted_count: usize,
        #[serde(default)]
        retried_batches: usize,
    },
    QueueRolledOver {
        /// Reset time of the day that was closed
        previous_reset: DateTime<Utc>,
        purged_count: usize,
    },
}

impl AuditEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::TicketIssued { .. } => "ticket_issued",
            Self::TicketCalled { .. } => "ticket_called",
            Self::QueueReset { .. } => "queue_reset",
            Self::QueueRolledOver { .. } => "queue_rolled_over",
        }
    }

    /// Ticket number the event is about, if any
    pub fn ticket_number(&self) -> Option<u64> {
        match self {
            Self::TicketIssued { ticket_number, .. } | Self::TicketCalled { ticket_number, .. } => {
                Some(*ticket_number)
            }
            _ => None,
        }
    }

    /// Operator who caused the event
    pub fn operator(&self) -> Option<&str> {
        match self {
            Self::TicketCalled { called_by, .. } => Some(called_by),
            Self::QueueReset { reset_by, .. } => reset_by.as_deref(),
            _ => None,
        }
    }

    /// How the queue was cleared, for reset and rollover events.
    pub fn clear_trigger(&self) -> Option<&str> {
        match self {
            Self::QueueReset { trigger, .. } => Some(trigger),
            Self::QueueRolledOver { .. } => Some(ROLLOVER_TRIGGER),
            _ => None,
        }
    }
}

/// Trigger recorded for the implicit clear on the first issue of a day.
pub const ROLLOVER_TRIGGER: &str = "rollover";

/// Every value [`AuditEvent::clear_trigger`] can return.
pub const CLEAR_TRIGGERS: [&str; 3] = ["manual", "scheduled", ROLLOVER_TRIGGER];

/// A stored audit record with the columns it is indexed by
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub ticket_number: Option<u64>,
    pub operator: Option<String>,
    pub trigger: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// Unsaved record for `event`; the store assigns the id.
    pub fn new(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            ticket_number: event.ticket_number(),
            operator: event.operator().map(String::from),
            trigger: event.clear_trigger().map(String::from),
            data: event,
        }
    }
}
