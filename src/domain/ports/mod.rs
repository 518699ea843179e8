//! Ports (interfaces) between the engine and the outside world.

pub mod context_source;
pub mod state_store;
pub mod worker;

pub use context_source::ContextPreparer;
pub use state_store::{RecordKey, StateStore};
pub use worker::Worker;
