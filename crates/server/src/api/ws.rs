//! WebSocket push of live queue updates to displays.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use walkin_core::QueueEvent;

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// How often an idle connection gets a heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A customer took a ticket.
    TicketIssued {
        ticket_number: u64,
        ticket_id: String,
    },
    /// An operator called a ticket.
    TicketCalled {
        ticket_number: u64,
        ticket_id: String,
        finalized: Option<u64>,
        missed: Vec<u64>,
    },
    /// All tickets were deleted and numbering restarts.
    QueueReset { trigger: String, deleted_count: usize },
    /// Server heartbeat (sent periodically to keep connection alive).
    Heartbeat { timestamp: i64 },
}

impl WsMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            WsMessage::TicketIssued { .. } => "ticket_issued",
            WsMessage::TicketCalled { .. } => "ticket_called",
            WsMessage::QueueReset { .. } => "queue_reset",
            WsMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    fn heartbeat() -> Self {
        WsMessage::Heartbeat {
            timestamp: Utc::now().timestamp(),
        }
    }
}

impl From<QueueEvent> for WsMessage {
    fn from(event: QueueEvent) -> Self {
        match event {
            QueueEvent::TicketIssued {
                ticket_number,
                ticket_id,
                ..
            } => WsMessage::TicketIssued {
                ticket_number,
                ticket_id,
            },
            QueueEvent::TicketCalled {
                ticket_number,
                ticket_id,
                finalized,
                missed,
            } => WsMessage::TicketCalled {
                ticket_number,
                ticket_id,
                finalized,
                missed,
            },
            QueueEvent::QueueReset {
                trigger,
                deleted_count,
            } => WsMessage::QueueReset {
                trigger,
                deleted_count,
            },
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.events().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("WebSocket client connected");

    // Forward queue events to this client
    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        // First tick completes immediately
        heartbeat.tick().await;

        loop {
            let msg = tokio::select! {
                result = rx.recv() => match result {
                    Ok(event) => WsMessage::from(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} events", n);
                        WS_LAG_EVENTS.inc();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Queue event channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => WsMessage::heartbeat(),
            };

            WS_MESSAGES_SENT
                .with_label_values(&[msg.message_type()])
                .inc();

            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize WsMessage: {}", e),
            }
        }
    });

    // Handle incoming messages from client (ping/pong, close)
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring client text message: {}", text.as_str());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_called_event_keeps_reconciliation_details() {
        let msg = WsMessage::from(QueueEvent::TicketCalled {
            ticket_number: 7,
            ticket_id: "abc".to_string(),
            finalized: Some(5),
            missed: vec![6],
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ticket_called");
        assert_eq!(json["ticket_number"], 7);
        assert_eq!(json["finalized"], 5);
        assert_eq!(json["missed"], serde_json::json!([6]));
    }

    #[test]
    fn test_issued_event_drops_internal_flags() {
        let msg = WsMessage::from(QueueEvent::TicketIssued {
            ticket_number: 1,
            ticket_id: "abc".to_string(),
            rolled_over: true,
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ticket_issued");
        assert!(json.get("rolled_over").is_none());
    }

    #[test]
    fn test_heartbeat_type() {
        assert_eq!(WsMessage::heartbeat().message_type(), "heartbeat");
    }
}
