//! Outer adapters that feed the application and report its results.

pub mod csv;
