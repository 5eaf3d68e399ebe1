//! Midnight reset loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::queue::{next_midnight_after, CallDispatcher, ResetTrigger};

/// Fallback wait when the next midnight cannot be computed.
const RECOMPUTE_INTERVAL: Duration = Duration::from_secs(3600);

/// Runs `ResetAll(Scheduled)` at every local midnight.
pub struct DailyResetScheduler {
    dispatcher: Arc<CallDispatcher>,
    tz: FixedOffset,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DailyResetScheduler {
    pub fn new(dispatcher: Arc<CallDispatcher>, tz: FixedOffset) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            dispatcher,
            tz,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// When the next scheduled reset fires, seen from `now`.
    pub fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_midnight_after(now, &self.tz)
    }

    /// Start the scheduler (spawns the background loop).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reset scheduler already running");
            return;
        }

        info!(utc_offset = %self.tz, "Starting daily reset scheduler");
        self.spawn_reset_loop();
    }

    /// Stop the scheduler. A reset already in progress runs to completion.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Reset scheduler not running");
            return;
        }

        info!("Stopping daily reset scheduler");
        let _ = self.shutdown_tx.send(());
    }

    fn spawn_reset_loop(&self) {
        let running = Arc::clone(&self.running);
        let dispatcher = Arc::clone(&self.dispatcher);
        let tz = self.tz;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Reset loop started");
            // Never target the same midnight twice, even if the wall clock lags the timer
            let mut after = Utc::now();
            loop {
                let target = next_midnight_after(after, &tz);
                let delay = match target {
                    Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                    None => {
                        warn!(%after, "Could not compute next local midnight");
                        RECOMPUTE_INTERVAL
                    }
                };
                debug!(next_reset = ?target, delay_secs = delay.as_secs(), "Next scheduled reset");

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reset loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        let Some(at) = target else {
                            after = Utc::now();
                            continue;
                        };

                        match dispatcher.reset_all(ResetTrigger::Scheduled).await {
                            Ok(outcome) => info!(
                                deleted = outcome.deleted_count,
                                retried_batches = outcome.retried_batches,
                                "Scheduled reset completed"
                            ),
                            Err(e) => error!(error = %e, "Scheduled reset failed"),
                        }
                        after = at.max(Utc::now());
                    }
                }
            }
            info!("Reset loop stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{
        parse_utc_offset, NewTicket, QueueState, QueueStore, QueueTxn, SqliteQueueStore,
    };

    fn seeded_store() -> Arc<SqliteQueueStore> {
        let store = Arc::new(SqliteQueueStore::in_memory().unwrap());
        for number in 1..=3 {
            store
                .create_ticket(NewTicket {
                    ticket_number: number,
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        store
            .run_transaction(&mut |txn: &mut dyn QueueTxn| {
                txn.set_state(&QueueState::fresh(3, Utc::now()))
            })
            .unwrap();
        store
    }

    #[test]
    fn test_next_run_is_local_midnight() {
        let tz = parse_utc_offset("+07:00").unwrap();
        let dispatcher = Arc::new(CallDispatcher::new(Arc::new(
            SqliteQueueStore::in_memory().unwrap(),
        )));
        let scheduler = DailyResetScheduler::new(dispatcher, tz);

        let now = DateTime::parse_from_rfc3339("2024-03-10T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = scheduler.next_run(now).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-11T17:00:00+00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_fires_at_midnight() {
        let store = seeded_store();
        let dispatcher = Arc::new(CallDispatcher::new(store.clone()));
        let scheduler = DailyResetScheduler::new(dispatcher, FixedOffset::east_opt(0).unwrap());

        scheduler.start();
        assert!(scheduler.is_running());

        // Paused time auto-advances to the scheduled wake-up
        tokio::time::sleep(Duration::from_secs(25 * 3600)).await;

        assert_eq!(store.count_tickets(None).unwrap(), 0);
        let state = store.read_state().unwrap().unwrap();
        assert_eq!(state.current_number, 0);
        assert_eq!(state.current_called, 0);

        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_midnight_keeps_tickets() {
        let store = seeded_store();
        let dispatcher = Arc::new(CallDispatcher::new(store.clone()));
        let scheduler = DailyResetScheduler::new(dispatcher, FixedOffset::east_opt(0).unwrap());

        scheduler.start();
        tokio::task::yield_now().await;
        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(25 * 3600)).await;

        assert_eq!(store.count_tickets(None).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_double_start_and_stop_are_harmless() {
        let dispatcher = Arc::new(CallDispatcher::new(Arc::new(
            SqliteQueueStore::in_memory().unwrap(),
        )));
        let scheduler = DailyResetScheduler::new(dispatcher, FixedOffset::east_opt(0).unwrap());

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
