mod azure;
mod common;
mod in_memory;

pub use azure::AzureBlobStore;
pub use common::{BlockStore, SharedStore, USER_AGENT};
pub use in_memory::InMemoryStore;
