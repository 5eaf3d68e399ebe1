//! SQLite-backed queue store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::store::check_batch_size;
use super::{
    NewTicket, QueueState, QueueStateUpdate, QueueStore, QueueTxn, StoreError, Ticket,
    TicketQuery, TicketStatus, TxnBody, QUEUE_STATE_KEY,
};

/// How long a connection waits on a locked database before reporting a conflict.
const BUSY_TIMEOUT_MS: u64 = 2_000;

const TICKET_COLUMNS: &str =
    "id, ticket_number, status, created_at, called_at, done_at, missed_at";

/// SQLite-backed queue store.
///
/// Transactions use `BEGIN IMMEDIATE`, so the write lock is held from the
/// first read of the queue state until commit. Several stores (or processes)
/// may open the same file; contention beyond the busy timeout surfaces as
/// [`StoreError::Conflict`].
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    /// Create a new SQLite queue store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(map_sqlite_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite queue store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_state (
                id TEXT PRIMARY KEY,
                current_number INTEGER NOT NULL DEFAULT 0,
                current_called INTEGER NOT NULL DEFAULT 0,
                last_reset TEXT NOT NULL,
                last_called_at TEXT
            );

            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                ticket_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                called_at TEXT,
                done_at TEXT,
                missed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_status_number ON tickets(status, ticket_number);
            CREATE INDEX IF NOT EXISTS idx_tickets_number ON tickets(ticket_number);
            CREATE INDEX IF NOT EXISTS idx_tickets_created_at ON tickets(created_at);
            "#,
        )
        .map_err(map_sqlite_error)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn build_where_clause(query: &TicketQuery) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = query.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }

        if let Some(number) = query.number {
            conditions.push("ticket_number = ?");
            params.push(Box::new(number as i64));
        }

        if let Some(after) = query.number_after {
            conditions.push("ticket_number > ?");
            params.push(Box::new(after as i64));
        }

        if let Some(before) = query.number_before {
            conditions.push("ticket_number < ?");
            params.push(Box::new(before as i64));
        }

        if let Some(at) = query.created_before {
            conditions.push("created_at < ?");
            params.push(Box::new(format_timestamp(&at)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl QueueStore for SqliteQueueStore {
    fn run_transaction(&self, body: &mut TxnBody<'_>) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;

        {
            let mut txn = SqliteTxn { conn: &tx };
            // Dropping `tx` on error rolls back.
            body(&mut txn)?;
        }

        tx.commit().map_err(map_sqlite_error)
    }

    fn read_state(&self) -> Result<Option<QueueState>, StoreError> {
        let conn = self.lock()?;
        read_state_row(&conn)
    }

    fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, StoreError> {
        let conn = self.lock()?;

        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO tickets (id, ticket_number, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                ticket.ticket_number as i64,
                TicketStatus::Waiting.as_str(),
                format_timestamp(&ticket.created_at),
            ],
        )
        .map_err(map_sqlite_error)?;

        Ok(Ticket {
            id,
            ticket_number: ticket.ticket_number,
            status: TicketStatus::Waiting,
            created_at: ticket.created_at,
            called_at: None,
            done_at: None,
            missed_at: None,
        })
    }

    fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, StoreError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS),
                params![id],
                TicketRow::from_row,
            )
            .optional()
            .map_err(map_sqlite_error)?;

        row.map(TicketRow::into_ticket).transpose()
    }

    fn query_tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(query);
        let sql = format!(
            "SELECT {} FROM tickets {} ORDER BY ticket_number ASC LIMIT ?",
            TICKET_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;

        // SQLite treats a negative limit as "no limit"
        let mut all_params = params;
        all_params.push(Box::new(query.limit.map(|l| l as i64).unwrap_or(-1)));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), TicketRow::from_row)
            .map_err(map_sqlite_error)?;

        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row.map_err(map_sqlite_error)?.into_ticket()?);
        }

        Ok(tickets)
    }

    fn count_tickets(&self, status: Option<TicketStatus>) -> Result<u64, StoreError> {
        let conn = self.lock()?;

        let count: i64 = match status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM tickets WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0)),
        }
        .map_err(map_sqlite_error)?;

        Ok(count as u64)
    }

    fn transition(
        &self,
        id: &str,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(column) = timestamp_column(from, to) else {
            return Ok(false);
        };

        let conn = self.lock()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE tickets SET status = ?1, {} = ?2 WHERE id = ?3 AND status = ?4",
                    column
                ),
                params![to.as_str(), format_timestamp(&at), id, from.as_str()],
            )
            .map_err(map_sqlite_error)?;

        Ok(changed == 1)
    }

    fn transition_batch(
        &self,
        ids: &[String],
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        check_batch_size(ids.len())?;
        let Some(column) = timestamp_column(from, to) else {
            return Ok(Vec::new());
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_sqlite_error)?;

        let mut applied = Vec::new();
        {
            let mut stmt = tx
                .prepare(&format!(
                    "UPDATE tickets SET status = ?1, {} = ?2 WHERE id = ?3 AND status = ?4",
                    column
                ))
                .map_err(map_sqlite_error)?;
            let at = format_timestamp(&at);
            for id in ids {
                let changed = stmt
                    .execute(params![to.as_str(), at, id, from.as_str()])
                    .map_err(map_sqlite_error)?;
                if changed > 0 {
                    applied.push(id.clone());
                }
            }
        }

        tx.commit().map_err(map_sqlite_error)?;
        Ok(applied)
    }

    fn delete_batch(&self, ids: &[String]) -> Result<usize, StoreError> {
        check_batch_size(ids.len())?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_sqlite_error)?;

        let mut deleted = 0;
        {
            let mut stmt = tx
                .prepare("DELETE FROM tickets WHERE id = ?1")
                .map_err(map_sqlite_error)?;
            for id in ids {
                deleted += stmt.execute(params![id]).map_err(map_sqlite_error)?;
            }
        }

        tx.commit().map_err(map_sqlite_error)?;
        Ok(deleted)
    }
}

/// Transaction view handed to [`QueueStore::run_transaction`] bodies.
struct SqliteTxn<'a> {
    conn: &'a Connection,
}

impl QueueTxn for SqliteTxn<'_> {
    fn get_state(&mut self) -> Result<Option<QueueState>, StoreError> {
        read_state_row(self.conn)
    }

    fn set_state(&mut self, state: &QueueState) -> Result<(), StoreError> {
        write_state_row(self.conn, state)
    }

    fn update_state(&mut self, update: &QueueStateUpdate) -> Result<(), StoreError> {
        let existing = read_state_row(self.conn)?;
        let merged = update.apply(existing, Utc::now());
        write_state_row(self.conn, &merged)
    }
}

fn read_state_row(conn: &Connection) -> Result<Option<QueueState>, StoreError> {
    let row = conn
        .query_row(
            "SELECT current_number, current_called, last_reset, last_called_at FROM queue_state WHERE id = ?1",
            params![QUEUE_STATE_KEY],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()
        .map_err(map_sqlite_error)?;

    let Some((current_number, current_called, last_reset, last_called_at)) = row else {
        return Ok(None);
    };

    Ok(Some(QueueState {
        current_number: current_number as u64,
        current_called: current_called as u64,
        last_reset: parse_timestamp(&last_reset)?,
        last_called_at: last_called_at.as_deref().map(parse_timestamp).transpose()?,
    }))
}

fn write_state_row(conn: &Connection, state: &QueueState) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO queue_state (id, current_number, current_called, last_reset, last_called_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            QUEUE_STATE_KEY,
            state.current_number as i64,
            state.current_called as i64,
            format_timestamp(&state.last_reset),
            state.last_called_at.as_ref().map(format_timestamp),
        ],
    )
    .map_err(map_sqlite_error)?;
    Ok(())
}

/// Raw ticket row before timestamp/status decoding.
struct TicketRow {
    id: String,
    ticket_number: i64,
    status: String,
    created_at: String,
    called_at: Option<String>,
    done_at: Option<String>,
    missed_at: Option<String>,
}

impl TicketRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ticket_number: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            called_at: row.get(4)?,
            done_at: row.get(5)?,
            missed_at: row.get(6)?,
        })
    }

    fn into_ticket(self) -> Result<Ticket, StoreError> {
        let status = TicketStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("ticket {} has unknown status {:?}", self.id, self.status))
        })?;

        Ok(Ticket {
            ticket_number: self.ticket_number as u64,
            status,
            created_at: parse_timestamp(&self.created_at)?,
            called_at: self.called_at.as_deref().map(parse_timestamp).transpose()?,
            done_at: self.done_at.as_deref().map(parse_timestamp).transpose()?,
            missed_at: self.missed_at.as_deref().map(parse_timestamp).transpose()?,
            id: self.id,
        })
    }
}

/// Column stamped by a forward transition, `None` for edges that are not allowed.
fn timestamp_column(from: TicketStatus, to: TicketStatus) -> Option<&'static str> {
    if !from.can_transition_to(to) {
        return None;
    }
    match to {
        TicketStatus::Called => Some("called_at"),
        TicketStatus::Done => Some("done_at"),
        TicketStatus::Missed => Some("missed_at"),
        TicketStatus::Waiting => None,
    }
}

/// Fixed-width UTC timestamps so that string comparison matches time order.
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {:?}: {}", value, e)))
}

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            StoreError::Conflict(err.to_string())
        }
        _ => StoreError::Unavailable(err.to_string()),
    }
}
