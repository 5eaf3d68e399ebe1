use std::sync::Arc;

use walkin_core::{
    AuditStore, Authenticator, CallDispatcher, Config, OperatorAuthorizer, QueueBroadcaster,
    QueueStateManager, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    authorizer: Arc<dyn OperatorAuthorizer>,
    audit_store: Arc<dyn AuditStore>,
    queue: Arc<QueueStateManager>,
    dispatcher: Arc<CallDispatcher>,
    events: QueueBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        authorizer: Arc<dyn OperatorAuthorizer>,
        audit_store: Arc<dyn AuditStore>,
        queue: Arc<QueueStateManager>,
        dispatcher: Arc<CallDispatcher>,
        events: QueueBroadcaster,
    ) -> Self {
        Self {
            config,
            authenticator,
            authorizer,
            audit_store,
            queue,
            dispatcher,
            events,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn authorizer(&self) -> &dyn OperatorAuthorizer {
        self.authorizer.as_ref()
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn queue(&self) -> &QueueStateManager {
        &self.queue
    }

    pub fn dispatcher(&self) -> &CallDispatcher {
        &self.dispatcher
    }

    /// Queue events forwarded to WebSocket clients.
    pub fn events(&self) -> &QueueBroadcaster {
        &self.events
    }
}
