mod memory;
mod provider;

pub use memory::{MemoryStore, MemoryStoreError};
pub use provider::{
    ChangeStream, ChangesOptions, DocumentStore, GetOptions, Since, StoreError, WriteResult,
};
