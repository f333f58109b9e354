//! Shared persistence plumbing for the ticketing client: a key-value storage
//! adapter and the versioned snapshot codec used for anything written to it.

pub mod snapshot;
pub mod storage;

pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
