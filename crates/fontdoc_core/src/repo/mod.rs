//! Storage collaborators for document persistence.
//!
//! # Responsibility
//! - Define the byte-level contract the document model reads and writes.
//! - Provide an in-memory store and a directory-tree store.
//!
//! # Invariants
//! - Stores never interpret record bytes.
//! - A missing entry is reported as not found, never as empty content.

mod dir_store;
mod memory_store;
mod store;

pub use dir_store::DirStore;
pub use memory_store::{MemoryStore, StoreOperation};
pub use store::{
    copy_entry, EntryKind, FontStore, LayerContents, ModTime, StoreError, StoreResult,
};
