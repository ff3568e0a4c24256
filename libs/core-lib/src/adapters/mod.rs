// Declare modules within the adapters directory
pub mod in_memory_storage;
pub mod synced_storage;

pub use in_memory_storage::InMemoryStorage;
pub use synced_storage::SyncedStorage;
