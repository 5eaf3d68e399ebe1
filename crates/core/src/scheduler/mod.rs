//! Background scheduler for the daily queue reset.
//!
//! Sleeps until the next local midnight in the configured offset and runs a
//! scheduled reset. Issuance still rolls the day over lazily, so a missed
//! midnight (process down, clock jump) is harmless.

mod runner;

pub use runner::DailyResetScheduler;
