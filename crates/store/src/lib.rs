//! Conversation store implementations for scholarly.

pub mod in_memory;

pub use in_memory::InMemoryStore;
