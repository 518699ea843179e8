//! Domain layer for the Sleuth orchestrator
//!
//! Models, ports and errors. Nothing in here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
