//! Outbound adapters (driven side).

pub mod aws;
pub mod ssh;
pub mod store;
