pub mod audit;
pub mod auth;
pub mod config;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use auth::{
    create_authenticator, create_authorizer, AllowListAuthorizer, AuthError, AuthRequest,
    Authenticator, Identity, NoneAuthenticator, Operator, OperatorAuthorizer,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use queue::{
    CallDispatcher, CallOutcome, IssuedTicket, QueueBroadcaster, QueueError, QueueEvent,
    QueueSnapshot, QueueStateManager, QueueStore, ResetOutcome, ResetTrigger, SqliteQueueStore,
    StoreError, Ticket, TicketStatus, TicketView,
};
pub use scheduler::DailyResetScheduler;
