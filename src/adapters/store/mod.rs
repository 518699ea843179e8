//! State store adapters.

pub mod fs_store;
pub mod memory_store;

pub use fs_store::FileStateStore;
pub use memory_store::InMemoryStateStore;
