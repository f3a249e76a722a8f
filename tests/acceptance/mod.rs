//! Integration tests for run-loop scheduling and inter-thread messaging.
//!
//! - Firing rates of concurrently registered entries
//! - Registration changes while the loop runs
//! - Ring buffer, queue and bus behavior across threads
//! - Configuration loaded from disk

mod common;
mod config_test;
mod messaging_test;
mod scheduler_test;
