//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Ticket issuance and daily rollover
//! - Call-next outcomes and skipped tickets
//! - Bulk resets and ticket purges
//! - Store transaction conflicts

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Issuance Metrics
// =============================================================================

/// Tickets issued total.
pub static TICKETS_ISSUED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("walkin_tickets_issued_total", "Total tickets issued").unwrap()
});

/// Daily rollovers performed lazily by ticket issuance.
pub static ROLLOVERS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "walkin_rollovers_total",
        "Total day rollovers triggered by ticket issuance",
    )
    .unwrap()
});

/// Issuance failures total.
pub static ISSUE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "walkin_issue_failures_total",
        "Total ticket issuance attempts that failed",
    )
    .unwrap()
});

// =============================================================================
// Dispatch Metrics
// =============================================================================

/// Call-next operations by result.
pub static CALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("walkin_calls_total", "Total call-next operations"),
        &["result"], // "called", "empty", "failed"
    )
    .unwrap()
});

/// Tickets marked missed during reconciliation.
pub static TICKETS_MISSED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "walkin_tickets_missed_total",
        "Total tickets skipped and marked missed",
    )
    .unwrap()
});

/// Resets by trigger and result.
pub static RESETS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("walkin_resets_total", "Total bulk queue resets"),
        &["trigger", "result"], // trigger: "manual", "scheduled"; result: "success", "degraded", "failed"
    )
    .unwrap()
});

/// Tickets deleted by purges (resets and rollovers).
pub static TICKETS_PURGED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "walkin_tickets_purged_total",
        "Total tickets deleted by purges",
    )
    .unwrap()
});

/// Tickets deleted per purge.
pub static PURGE_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("walkin_purge_size", "Number of tickets deleted per purge")
            .buckets(vec![0.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Store Metrics
// =============================================================================

/// Transaction conflicts observed, by outcome.
pub static TRANSACTION_CONFLICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "walkin_transaction_conflicts_total",
            "Total store transaction conflicts",
        ),
        &["outcome"], // "retried", "exhausted"
    )
    .unwrap()
});

/// Delete batches that failed and were retried.
pub static BATCH_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "walkin_delete_batch_retries_total",
        "Total delete batch retries",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Issuance
        Box::new(TICKETS_ISSUED.clone()),
        Box::new(ROLLOVERS.clone()),
        Box::new(ISSUE_FAILURES.clone()),
        // Dispatch
        Box::new(CALLS_TOTAL.clone()),
        Box::new(TICKETS_MISSED.clone()),
        Box::new(RESETS_TOTAL.clone()),
        Box::new(TICKETS_PURGED.clone()),
        Box::new(PURGE_SIZE.clone()),
        // Store
        Box::new(TRANSACTION_CONFLICTS.clone()),
        Box::new(BATCH_RETRIES.clone()),
    ]
}
