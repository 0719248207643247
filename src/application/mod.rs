//! Application layer: payment use cases and the queue consumer that drives
//! them.

pub mod consumer;
pub mod retry;
pub mod service;
