//! Adapters for the domain ports.

pub mod broker;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod row_lock;
pub mod simulated;
