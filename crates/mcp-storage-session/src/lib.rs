//! # Session Storage
//!
//! Session bookkeeping for the MCP storage gateway: the `SessionStorage` trait, the in-memory
//! backend and the background sweeper that expires idle sessions.

mod traits;
pub use traits::*;

pub mod in_memory;
pub mod sweeper;

pub use in_memory::{InMemoryConfig, InMemorySessionStorage};
pub use sweeper::SessionSweeper;

/// Create a default in-memory session storage instance
pub fn create_default_storage() -> InMemorySessionStorage {
    InMemorySessionStorage::new()
}
