//! Adapters for external systems: record storage, workers, context sources.

pub mod context;
pub mod store;
pub mod workers;
