pub mod state_db;
pub mod store;

pub use state_db::SqliteStore;
pub use store::{KeyValueStore, MemoryStore};
