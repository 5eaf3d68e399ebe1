//! Ticket API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use walkin_core::{QueueError, Ticket, TicketStatus, TicketView};

use super::middleware::OperatorUser;
use super::queue::ActionResponse;
use crate::state::AppState;

/// Maximum allowed limit for ticket listings
const MAX_LIMIT: usize = 1000;

/// Default limit for ticket listings
const DEFAULT_LIMIT: usize = 100;

/// Shown to customers whenever issuance fails, whatever the cause
const ISSUE_FAILED_MESSAGE: &str = "We could not issue a ticket right now. Please try again.";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for a freshly issued ticket
#[derive(Debug, Serialize)]
pub struct IssueTicketResponse {
    pub success: bool,
    pub ticket_number: u64,
    pub ticket_id: String,
}

/// Query parameters for listing tickets
#[derive(Debug, Deserialize)]
pub struct ListTicketsParams {
    /// Filter by status (waiting, called, done, missed)
    pub status: Option<String>,
    /// Maximum number of tickets to return
    pub limit: Option<usize>,
}

/// Response for listing tickets
#[derive(Debug, Serialize)]
pub struct ListTicketsResponse {
    pub tickets: Vec<Ticket>,
    pub count: usize,
    pub limit: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Issue the next ticket number to a walk-in customer
pub async fn issue_ticket(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<IssueTicketResponse>), impl IntoResponse> {
    match state.queue().issue_ticket().await {
        Ok(issued) => Ok((
            StatusCode::CREATED,
            Json(IssueTicketResponse {
                success: true,
                ticket_number: issued.ticket_number,
                ticket_id: issued.ticket_id,
            }),
        )),
        Err(_) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ActionResponse::failure(ISSUE_FAILED_MESSAGE)),
        )),
    }
}

/// Get a ticket with the customer's place in line
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketView>, impl IntoResponse> {
    match state.queue().ticket_view(&id) {
        Ok(view) => Ok(Json(view)),
        Err(QueueError::TicketNotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(ActionResponse::failure("Ticket not found")),
        )),
        Err(e) => {
            error!(ticket_id = %id, error = %e, "Failed to load ticket");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ActionResponse::failure(
                    "Ticket status is unavailable right now",
                )),
            ))
        }
    }
}

/// List tickets for the operator board
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    OperatorUser(_operator): OperatorUser,
    Query(params): Query<ListTicketsParams>,
) -> Result<Json<ListTicketsResponse>, impl IntoResponse> {
    let status = match params.status.as_deref() {
        None => None,
        Some(value) => match TicketStatus::parse(value) {
            Some(status) => Some(status),
            None => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ActionResponse::failure(format!(
                        "Unknown ticket status: {}",
                        value
                    ))),
                ));
            }
        },
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.queue().list_tickets(status, limit) {
        Ok(tickets) => Ok(Json(ListTicketsResponse {
            count: tickets.len(),
            tickets,
            limit,
        })),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ActionResponse::failure(e.to_string())),
        )),
    }
}
