//! Outbound adapters: persistence, the delivery queue, and the carrier.

pub mod persistence;
pub mod provider;
pub mod queue;
