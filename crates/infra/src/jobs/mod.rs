//! Background report generation with retry, backoff and recovery.
//!
//! ## Design
//!
//! - Reports are queued in-process right after payment confirmation
//! - A periodic recovery scan re-queues reports the queue never delivered
//! - Each attempt has a deadline; failed attempts back off exponentially
//! - Exhausted reports are flagged `error` and leave the recovery scan
//! - Shutdown interrupts waits and attempts, then joins every worker
//!
//! ## Components
//!
//! - `ReportJob`: the score-and-generate pipeline for one report
//! - `Runner`: bounded queue, worker pool and recovery scan
//! - `Enqueuer`: the narrow hand-off used by payment processing
//! - `RetryPolicy`: attempts and backoff
//! - `Shutdown`: cooperative stop signal

pub mod job;
pub mod retry;
pub mod runner;
pub mod shutdown;

pub use job::{JobError, ReportJob};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use runner::{EnqueueError, Enqueuer, Runner, RunnerConfig, RunnerStats};
pub use shutdown::{Shutdown, ShutdownTrigger, shutdown_channel};
