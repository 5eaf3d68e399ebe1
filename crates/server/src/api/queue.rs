//! Queue API handlers: the public snapshot and operator actions.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use walkin_core::{CallOutcome, QueueSnapshot, ResetTrigger};

use super::middleware::OperatorUser;
use crate::state::AppState;

/// Plain success/failure reply used by queue actions and their errors
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Response for a successful call
#[derive(Debug, Serialize)]
pub struct CallNextResponse {
    pub success: bool,
    pub ticket_number: u64,
    pub ticket_id: String,
    pub finalized: Option<u64>,
    pub missed: Vec<u64>,
}

/// Response for a completed reset
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub deleted_count: usize,
    pub retried_batches: usize,
    pub message: String,
}

/// Current queue counters, for customer and operator displays
pub async fn get_queue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueSnapshot>, impl IntoResponse> {
    state.queue().snapshot().map(Json).map_err(|e| {
        tracing::error!(error = %e, "Failed to read queue snapshot");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ActionResponse::failure("Queue status is unavailable right now")),
        )
    })
}

/// Call the next waiting customer
pub async fn call_next(
    State(state): State<Arc<AppState>>,
    OperatorUser(operator): OperatorUser,
) -> impl IntoResponse {
    match state.dispatcher().call_next(&operator).await {
        Ok(CallOutcome::Called {
            ticket_number,
            ticket_id,
            finalized,
            missed,
        }) => (
            StatusCode::OK,
            Json(CallNextResponse {
                success: true,
                ticket_number,
                ticket_id,
                finalized,
                missed,
            }),
        )
            .into_response(),
        Ok(CallOutcome::Empty) => (
            StatusCode::OK,
            Json(ActionResponse::failure("No one is waiting")),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ActionResponse::failure(e.to_string())),
        )
            .into_response(),
    }
}

/// Delete every ticket and restart numbering
pub async fn reset_queue(
    State(state): State<Arc<AppState>>,
    OperatorUser(operator): OperatorUser,
) -> Result<Json<ResetResponse>, impl IntoResponse> {
    match state
        .dispatcher()
        .reset_all(ResetTrigger::Manual(operator))
        .await
    {
        Ok(outcome) => {
            let message = if outcome.is_degraded() {
                format!(
                    "Queue reset, {} tickets deleted ({} batches needed a retry)",
                    outcome.deleted_count, outcome.retried_batches
                )
            } else {
                format!("Queue reset, {} tickets deleted", outcome.deleted_count)
            };
            Ok(Json(ResetResponse {
                success: true,
                deleted_count: outcome.deleted_count,
                retried_batches: outcome.retried_batches,
                message,
            }))
        }
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ActionResponse::failure(e.to_string())),
        )),
    }
}
