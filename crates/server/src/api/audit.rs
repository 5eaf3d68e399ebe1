//! Audit trail queries for operators.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use walkin_core::audit::{CLEAR_TRIGGERS, DEFAULT_AUDIT_LIMIT};
use walkin_core::queue::start_of_local_day;
use walkin_core::{AuditFilter, AuditRecord};

use super::middleware::OperatorUser;
use super::queue::ActionResponse;
use crate::state::AppState;

/// Maximum allowed limit for audit queries
const MAX_LIMIT: i64 = 1000;

/// Query parameters for audit endpoint
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub event_type: Option<String>,
    /// Everything that happened to one ticket number
    pub ticket_number: Option<u64>,
    /// Operator id of calls and manual resets
    pub operator: Option<String>,
    /// How the queue was cleared: manual, scheduled or rollover
    pub trigger: Option<String>,
    /// Only events since the start of the current operating day
    #[serde(default)]
    pub today: bool,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    /// Pagination offset (default 0)
    pub offset: Option<i64>,
}

/// Response for audit query endpoint
#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events ignoring limit and offset
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query the audit trail (operators only)
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    OperatorUser(_operator): OperatorUser,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, impl IntoResponse> {
    if let Some(ref trigger) = params.trigger {
        if !CLEAR_TRIGGERS.contains(&trigger.as_str()) {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ActionResponse::failure(format!(
                    "Unknown trigger '{}', expected one of: {}",
                    trigger,
                    CLEAR_TRIGGERS.join(", ")
                ))),
            ));
        }
    }

    let limit = params
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = AuditFilter::new();
    if let Some(event_type) = params.event_type {
        filter = filter.with_event_type(event_type);
    }
    if let Some(number) = params.ticket_number {
        filter = filter.touching_number(number);
    }
    if let Some(operator) = params.operator {
        filter = filter.by_operator(operator);
    }
    if let Some(trigger) = params.trigger {
        filter = filter.with_trigger(trigger);
    }
    if params.today {
        filter = filter.since(start_of_local_day(Utc::now(), &state.queue().time_zone()));
    }

    let store = state.audit_store();
    let page = store
        .query(&filter.clone().with_limit(limit).with_offset(offset))
        .and_then(|events| Ok((events, store.count(&filter)?)));

    match page {
        Ok((events, total)) => Ok(Json(AuditQueryResponse {
            events,
            total,
            limit,
            offset,
        })),
        Err(e) => {
            error!(error = %e, "Failed to query audit trail");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ActionResponse::failure("Failed to query audit trail")),
            ))
        }
    }
}
