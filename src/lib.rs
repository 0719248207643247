//! Asynchronous payment processing.
//!
//! Payments are created `PENDING` and handed to a queue; a pool of workers
//! consumes the queue and moves each payment to `SUCCESS` or `FAILED` exactly
//! once, retrying transient failures and dead-lettering the ones that never
//! recover.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;
