use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Default page size for audit queries.
pub const DEFAULT_AUDIT_LIMIT: i64 = 100;

/// Selects audit records by what happened in the queue.
///
/// Unset fields match everything. Results come back newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    /// Records that touched this number: issued, called, finalized or skipped.
    pub ticket_number: Option<u64>,
    /// Operator id, compared case-insensitively.
    pub operator: Option<String>,
    /// How the queue was cleared, see [`CLEAR_TRIGGERS`](super::CLEAR_TRIGGERS).
    pub trigger: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_AUDIT_LIMIT,
            offset: 0,
            ..Default::default()
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn touching_number(mut self, ticket_number: u64) -> Self {
        self.ticket_number = Some(ticket_number);
        self
    }

    pub fn by_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    /// Only records at or after `since`, usually the start of the operating day.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for audit event storage
pub trait AuditStore: Send + Sync {
    /// Insert an audit record, returns the assigned ID
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Newest records first
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Count matching audit records, ignoring limit and offset
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}
