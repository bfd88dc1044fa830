//! Storage implementations for redline.

pub mod in_memory;
pub mod result_store;

pub use in_memory::InMemoryStore;
pub use result_store::{FileResultStore, InMemoryResultStore};
