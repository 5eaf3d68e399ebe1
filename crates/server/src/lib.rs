//! HTTP and WebSocket front end for the walk-in queue.

pub mod api;
pub mod metrics;
pub mod state;
