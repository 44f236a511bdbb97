//! Durable client-side state.

pub mod kv_store;
pub mod persisted;

pub use kv_store::{KvStore, MemoryKvStore, SqliteKvStore, StoreFuture};
pub use persisted::{DurableRecord, load_record, save_record};
